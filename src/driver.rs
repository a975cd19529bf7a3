use std::{
    fs,
    io::{self, Read},
    path::PathBuf,
};

use clap::{Parser, ValueEnum};
use thiserror::Error;
use tracing::{info, Level};

use pjc_parser::{
    derivation::{DerivationError, DerivationTree},
    lexer::{self, Lexer, LexerError, Token, TokenStreamError},
    ParserError, DEFAULT_MAX_DEPTH,
};

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Could not read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("Could not write {path}: {source}")]
    Write { path: String, source: io::Error },
    #[error(transparent)]
    Lexer(#[from] LexerError),
    #[error(transparent)]
    TokenStream(#[from] TokenStreamError),
    #[error(transparent)]
    Derivation(#[from] DerivationError),
    #[error("Syntax error: {}", .0.render())]
    Parser(#[from] ParserError),
    /// Definitions checked and at least one use was unresolved. `report` is
    /// everything the check printed.
    #[error("{source}")]
    Check { report: String, source: BoxedError },
    #[error("{stage}: {source}")]
    Stage {
        stage: &'static str,
        source: BoxedError,
    },
    #[error("The {0} stage is not part of this build")]
    StageUnavailable(&'static str),
}

impl DriverError {
    /// What the failing stage prints on standard output in place of its
    /// normal result.
    pub fn stdout(&self) -> Option<String> {
        match self {
            DriverError::Parser(err) => Some(format!("{}\n", err.render())),
            DriverError::Check { report, .. } => Some(report.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// Program text
    #[default]
    Source,
    /// One `KIND LINE LEXEME` token per line
    Tokens,
    /// Indented derivation tree
    Tree,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lex,
    Parse,
    Check,
    Codegen,
    #[default]
    Emit,
}

#[derive(Parser, Debug)]
#[command(
    name = "pjc",
    version,
    about = "Compiles the PJ loop language to FRISC assembly"
)]
pub struct Options {
    /// Input file, standard input when omitted
    pub input: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = InputFormat::Source)]
    pub input_format: InputFormat,

    /// Print the token stream and stop
    #[arg(long, group = "stage")]
    pub lex: bool,
    /// Print the derivation tree and stop
    #[arg(long, group = "stage")]
    pub parse: bool,
    /// Print where every identifier use was defined and stop
    #[arg(long, group = "stage")]
    pub check: bool,
    /// Print the generated instructions and stop without writing a file
    #[arg(long, group = "stage")]
    pub codegen: bool,

    #[arg(short, long, default_value = "a.frisc")]
    pub output: PathBuf,

    /// Also print the assembly on standard output
    #[arg(long)]
    pub echo: bool,

    /// Deepest nesting of expressions and loops accepted
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,

    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Options {
    pub fn stage(&self) -> Stage {
        if self.lex {
            Stage::Lex
        } else if self.parse {
            Stage::Parse
        } else if self.check {
            Stage::Check
        } else if self.codegen {
            Stage::Codegen
        } else {
            Stage::Emit
        }
    }

    fn log_level(&self) -> Level {
        if self.quiet {
            return Level::ERROR;
        }
        match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    pub fn read_input(&self) -> Result<String, DriverError> {
        match &self.input {
            Some(path) => fs::read_to_string(path).map_err(|source| DriverError::Read {
                path: path.display().to_string(),
                source,
            }),
            None => {
                let mut input = String::new();
                io::stdin()
                    .read_to_string(&mut input)
                    .map_err(|source| DriverError::Read {
                        path: "<stdin>".to_owned(),
                        source,
                    })?;
                Ok(input)
            }
        }
    }
}

/// What a run produced. Nothing is written to disk until a run has
/// completed, so a failing stage never leaves partial output behind.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub stdout: String,
    pub assembly: Option<String>,
}

enum Input {
    Tokens(Vec<Token>),
    Tree(DerivationTree),
}

impl Input {
    fn read(format: InputFormat, text: &str) -> Result<Self, DriverError> {
        Ok(match format {
            InputFormat::Source => Input::Tokens(Lexer::new(text.to_owned()).tokenize()?),
            InputFormat::Tokens => Input::Tokens(lexer::read_token_stream(text)?),
            InputFormat::Tree => Input::Tree(text.parse()?),
        })
    }

    fn tokens(&self) -> Vec<Token> {
        match self {
            Input::Tokens(tokens) => tokens.clone(),
            Input::Tree(tree) => tree.terminals().cloned().collect(),
        }
    }

    fn into_tree(self, max_depth: usize) -> Result<DerivationTree, ParserError> {
        match self {
            Input::Tokens(tokens) => pjc_parser::Parser::new(tokens)
                .with_max_depth(max_depth)
                .parse_program(),
            Input::Tree(tree) => Ok(tree),
        }
    }
}

pub fn execute(opts: &Options, text: &str) -> Result<Outcome, DriverError> {
    let stage = opts.stage();
    info!(?stage, format = ?opts.input_format, "running");

    let input = Input::read(opts.input_format, text)?;

    match stage {
        Stage::Lex => Ok(Outcome {
            stdout: lexer::write_token_stream(&input.tokens()),
            assembly: None,
        }),
        Stage::Check => check(&input),
        Stage::Parse => Ok(Outcome {
            stdout: input.into_tree(opts.max_depth)?.to_string(),
            assembly: None,
        }),
        Stage::Codegen | Stage::Emit => {
            let tree = input.into_tree(opts.max_depth)?;
            generate(opts, &tree)
        }
    }
}

#[cfg(feature = "validate")]
fn check(input: &Input) -> Result<Outcome, DriverError> {
    let report = pjc_semantic_analysis::check_tokens(&input.tokens());
    let stdout = report.render();

    match report.into_result() {
        Ok(resolutions) => {
            info!(uses = resolutions.len(), "every use is defined");
            Ok(Outcome {
                stdout,
                assembly: None,
            })
        }
        Err(err) => Err(DriverError::Check {
            report: stdout,
            source: Box::new(err),
        }),
    }
}

#[cfg(not(feature = "validate"))]
fn check(_: &Input) -> Result<Outcome, DriverError> {
    Err(DriverError::StageUnavailable("check"))
}

#[cfg(feature = "asmgen")]
fn generate(opts: &Options, tree: &DerivationTree) -> Result<Outcome, DriverError> {
    let program = pjc_ast::Reconstructor::new(tree)
        .with_max_depth(opts.max_depth)
        .program()
        .map_err(|err| DriverError::Stage {
            stage: "reconstruct",
            source: Box::new(err),
        })?;
    let assembly =
        pjc_asmgen::generate_program(&program).map_err(|err| DriverError::Stage {
            stage: "codegen",
            source: Box::new(err),
        })?;

    if let Stage::Codegen = opts.stage() {
        return Ok(Outcome {
            stdout: format!("{:#?}\n", assembly),
            assembly: None,
        });
    }

    emit(opts, &assembly)
}

#[cfg(not(feature = "asmgen"))]
fn generate(_: &Options, _: &DerivationTree) -> Result<Outcome, DriverError> {
    Err(DriverError::StageUnavailable("codegen"))
}

#[cfg(feature = "emit")]
fn emit(opts: &Options, assembly: &pjc_asm::Program) -> Result<Outcome, DriverError> {
    use pjc_asm::EmitAsm;

    let text = assembly.emit(0);
    Ok(Outcome {
        stdout: if opts.echo { text.clone() } else { String::new() },
        assembly: Some(text),
    })
}

#[cfg(all(feature = "asmgen", not(feature = "emit")))]
fn emit(_: &Options, _: &pjc_asm::Program) -> Result<Outcome, DriverError> {
    Err(DriverError::StageUnavailable("emit"))
}

fn init_logging(opts: &Options) {
    // A subscriber may already be installed when embedded; keep it.
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(opts.log_level())
        .with_writer(io::stderr)
        .try_init();
}

pub fn run() -> Result<(), DriverError> {
    let opts = Options::parse();
    init_logging(&opts);

    let text = opts.read_input()?;

    let outcome = match execute(&opts, &text) {
        Ok(outcome) => outcome,
        Err(err) => {
            if let Some(stdout) = err.stdout() {
                print!("{stdout}");
            }
            return Err(err);
        }
    };

    print!("{}", outcome.stdout);

    if let Some(assembly) = outcome.assembly {
        fs::write(&opts.output, assembly).map_err(|source| DriverError::Write {
            path: opts.output.display().to_string(),
            source,
        })?;
        info!(path = %opts.output.display(), "assembly written");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(args: &[&str]) -> Options {
        Options::try_parse_from(std::iter::once("pjc").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn test_defaults() {
        let opts = options(&[]);

        assert_eq!(opts.stage(), Stage::Emit);
        assert_eq!(opts.input_format, InputFormat::Source);
        assert_eq!(opts.output, PathBuf::from("a.frisc"));
        assert_eq!(opts.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(opts.input, None);
        assert_eq!(opts.log_level(), Level::WARN);
    }

    #[test]
    fn test_stage_flags() {
        assert_eq!(options(&["--lex"]).stage(), Stage::Lex);
        assert_eq!(options(&["--parse", "prog.pj"]).stage(), Stage::Parse);
        assert_eq!(options(&["--check"]).stage(), Stage::Check);
        assert_eq!(options(&["--codegen"]).stage(), Stage::Codegen);

        assert!(Options::try_parse_from(["pjc", "--lex", "--parse"]).is_err());
    }

    #[test]
    fn test_verbosity() {
        assert_eq!(options(&["-vv"]).log_level(), Level::DEBUG);
        assert_eq!(options(&["-q"]).log_level(), Level::ERROR);
        assert!(Options::try_parse_from(["pjc", "-q", "-v"]).is_err());
    }

    #[test]
    fn test_lex_from_tree() {
        let opts = options(&["--lex", "--input-format", "tree"]);
        let outcome = execute(&opts, "<program>\n <lista_naredbi>\n  $\n").expect("should run");
        assert_eq!(outcome, Outcome::default());
    }

    #[test]
    fn test_syntax_error_output() {
        let err = execute(&options(&["--parse"]), "x =").expect_err("should fail");
        assert_eq!(err.stdout(), Some("err kraj\n".to_owned()));
    }

    #[test]
    fn test_codegen_stage_writes_nothing() {
        let outcome = execute(&options(&["--codegen"]), "rez = 2 * 3").expect("should run");

        assert_eq!(outcome.assembly, None);
        assert!(outcome.stdout.contains("Call"));
    }
}
