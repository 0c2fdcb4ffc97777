#[derive(Debug)]
pub enum CommandResult {
    Continue,
    Exit,
    Error(String),
}
