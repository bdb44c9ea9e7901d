use std::io::{BufRead, Write};

use cinpla_core::confirm::{parse_answer, Confirm};

/// Asks on stderr and reads the answer from stdin. End of input counts as
/// "no".
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        let stdin = std::io::stdin();
        let mut stderr = std::io::stderr();
        loop {
            let _ = write!(stderr, "{prompt} [y/N] ");
            let _ = stderr.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return false,
                Ok(_) => {}
            }
            if let Some(answer) = parse_answer(&line, false) {
                return answer;
            }
            let _ = writeln!(stderr, "please answer y or n");
        }
    }
}
