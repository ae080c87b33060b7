use std::io::{self, BufRead, Write};

/// What the operator typed at a blocking prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorReply {
    Line(String),
    /// End of input (Ctrl-D) or a read failure.
    Interrupted,
}

/// The human watching the run. Prompts block the whole task until answered.
pub trait Operator: Send {
    fn prompt(&mut self, message: &str) -> OperatorReply;

    /// Print something for the operator without waiting for an answer.
    fn notify(&mut self, message: &str);
}

/// Stdin/stdout console.
#[derive(Debug, Default)]
pub struct ConsoleOperator;

impl ConsoleOperator {
    pub fn new() -> Self {
        Self
    }
}

impl Operator for ConsoleOperator {
    fn prompt(&mut self, message: &str) -> OperatorReply {
        print!("{message}");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => OperatorReply::Interrupted,
            Ok(_) => OperatorReply::Line(line.trim().to_string()),
        }
    }

    fn notify(&mut self, message: &str) {
        println!("{message}");
    }
}
