use pjc::driver;

fn main() -> anyhow::Result<()> {
    driver::run()?;

    Ok(())
}
