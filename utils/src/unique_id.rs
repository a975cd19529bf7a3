/// Hands out ids that are never repeated within one compilation run.
///
/// The code generator owns one of these instead of reaching for a process
/// wide counter, so two runs in the same process (or two tests) produce the
/// same labels.
pub trait IdSource {
    fn next_id(&mut self) -> u64;
}

/// Monotonic counter, starting at whatever value it was built with.
#[derive(Debug, Default, Clone)]
pub struct Sequential {
    next: u64,
}

impl Sequential {
    pub fn starting_at(next: u64) -> Self {
        Self { next }
    }
}

impl IdSource for Sequential {
    fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Storage label for `name` declared in the scope at `scope_path`:
/// `V_x` in the root, `V1_4_x` two loops deep.
pub fn variable_label_name(scope_path: &[u64], name: &str) -> String {
    let mut label = "V".to_owned();
    for id in scope_path {
        label.push_str(&id.to_string());
        label.push('_');
    }
    if scope_path.is_empty() {
        label.push('_');
    }
    label.push_str(name);
    label
}

pub fn loop_label_name(id: u64) -> String {
    format!("LOOP{id}")
}

pub fn constant_label_name(index: usize) -> String {
    format!("C{index}")
}
