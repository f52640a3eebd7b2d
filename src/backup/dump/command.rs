use crate::backup::redacted::{RedactedString, REDACTED_SECRET};
use bon::Builder;
use getset::{CopyGetters, Getters};
use itertools::Itertools;
use std::fmt::{Display, Formatter};
use std::process::Command;

/// Ask for one consistent snapshot of InnoDB tables
const SINGLE_TRANSACTION_FLAG: &str = "--single-transaction";
/// Stream rows instead of buffering the whole result set
const QUICK_FLAG: &str = "--quick";
const NO_LOCK_TABLES_FLAG: &str = "--lock-tables=false";

/// Invocation of the database dump tool for one database.
///
/// `Display` renders the command line with the password replaced, so it is safe
/// to log. Only [`DumpCommand::to_command`] sees the real password.
#[derive(Clone, Debug, Builder, Getters, CopyGetters)]
pub struct DumpCommand {
    #[builder(into)]
    #[getset(get = "pub")]
    program: String,
    #[builder(into)]
    #[getset(get = "pub")]
    host: String,
    #[getset(get_copy = "pub")]
    port: u16,
    #[builder(into)]
    #[getset(get = "pub")]
    username: String,
    #[builder(into)]
    password: RedactedString,
    #[builder(into)]
    #[getset(get = "pub")]
    database: String,
}

impl DumpCommand {
    fn args_with_password(&self, password: &str) -> Vec<String> {
        let mut args = vec![
            format!("--host={}", self.host),
            format!("--port={}", self.port),
            format!("--user={}", self.username),
            SINGLE_TRANSACTION_FLAG.to_string(),
            QUICK_FLAG.to_string(),
            NO_LOCK_TABLES_FLAG.to_string(),
        ];
        if !self.password.is_empty() {
            args.push(format!("--password={}", password));
        }
        args.push(self.database.clone());
        args
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.args_with_password(self.password.secret()));
        command
    }
}

impl Display for DumpCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}",
            self.program,
            self.args_with_password(REDACTED_SECRET).iter().join(" ")
        )
    }
}
