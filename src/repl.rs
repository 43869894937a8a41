use rustyline::{error::ReadlineError, DefaultEditor};

use crate::{
    diagnostics::{BetlangError, Diagnostic, Result},
    driver::{Config, Session},
    span::SourceMap,
};

const HELP: &str = "\
:help          show this help
:quit          leave the repl
:seed N        reseed the generator
:reset         drop definitions and restart the session
Anything else is evaluated as a BetLang form.";

pub struct Repl {
    session: Session,
}

impl Repl {
    pub fn new(config: Config) -> Self {
        Self {
            session: Session::new(config),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new()
            .map_err(|err| BetlangError::from(std::io::Error::new(std::io::ErrorKind::Other, err)))?;
        loop {
            match editor.readline("bet> ") {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    editor.add_history_entry(trimmed).ok();
                    if self.meta_command(trimmed) {
                        if trimmed == ":quit" {
                            break;
                        }
                        continue;
                    }
                    match self.session.eval_line(trimmed) {
                        Ok((value, warnings)) => {
                            let map = SourceMap::new(trimmed);
                            for warning in &warnings {
                                eprintln!("{}", warning.render(&map));
                            }
                            println!("{value}");
                        }
                        Err(diagnostics) => report(trimmed, &diagnostics),
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => {
                    return Err(BetlangError::from(std::io::Error::new(std::io::ErrorKind::Other, err)));
                }
            }
        }
        Ok(())
    }

    /// Returns true when the line was a meta-command.
    fn meta_command(&mut self, line: &str) -> bool {
        if line == ":help" {
            println!("{HELP}");
            return true;
        }
        if line == ":quit" {
            return true;
        }
        if line == ":reset" {
            self.session.reset();
            println!("session reset");
            return true;
        }
        if let Some(rest) = line.strip_prefix(":seed") {
            match rest.trim().parse::<u64>() {
                Ok(seed) => {
                    self.session.reseed(seed);
                    println!("seeded with {seed}");
                }
                Err(_) => eprintln!("usage: :seed N"),
            }
            return true;
        }
        if line.starts_with(':') {
            eprintln!("unknown meta-command `{line}`; try :help");
            return true;
        }
        false
    }
}

/// Print each diagnostic and point a caret at the offending column.
fn report(source: &str, diagnostics: &[Diagnostic]) {
    let map = SourceMap::new(source);
    for diag in diagnostics {
        eprintln!("{}", diag.render(&map));
        if let Some(span) = diag.span {
            let position = map.position(span.start);
            if position.line == 1 {
                eprintln!("  {source}");
                eprintln!("  {}^", " ".repeat(position.col.saturating_sub(1)));
            }
        }
    }
}
