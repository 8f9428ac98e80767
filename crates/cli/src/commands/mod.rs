pub mod ask;
pub mod doctor;
pub mod init;
pub mod serve;

pub type CommandResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
