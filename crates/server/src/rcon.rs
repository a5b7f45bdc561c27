#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RconCommand {
    Help,
    Status,
    Tables,
    Dump { table: String },
    Add { table: String, value: String },
    ChangeLevel { map: String },
    Kick { client_id: u32 },
}

pub const HELP: &str = "commands: status, tables, dump <table>, add <table> <string>, \
                        changelevel <map>, kick <client_id>";

impl RconCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        let command = match name {
            "help" | "" => RconCommand::Help,
            "status" => RconCommand::Status,
            "tables" => RconCommand::Tables,
            "dump" => RconCommand::Dump {
                table: single_arg(name, rest, "<table>")?,
            },
            "add" => {
                let Some((table, value)) = rest.split_once(char::is_whitespace) else {
                    return Err("usage: add <table> <string>".to_string());
                };
                RconCommand::Add {
                    table: table.to_string(),
                    value: value.trim().to_string(),
                }
            }
            "changelevel" | "map" => RconCommand::ChangeLevel {
                map: single_arg(name, rest, "<map>")?,
            },
            "kick" => {
                let id = single_arg(name, rest, "<client_id>")?;
                let client_id = id
                    .parse()
                    .map_err(|_| format!("invalid client id '{}'", id))?;
                RconCommand::Kick { client_id }
            }
            other => return Err(format!("unknown command '{}'", other)),
        };
        Ok(command)
    }
}

fn single_arg(name: &str, rest: &str, usage: &str) -> Result<String, String> {
    if rest.is_empty() || rest.contains(char::is_whitespace) {
        return Err(format!("usage: {} {}", name, usage));
    }
    Ok(rest.to_string())
}
