//! Interactive commands read from stdin while running.

/// One line typed by the user
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Servers,
    Clients,
    /// Indexes are 1-based as printed in the lists
    Connect(usize),
    Approve(usize),
    Reject(usize),
    /// A client index on the server; the server itself on a client
    Disconnect(Option<usize>),
    History,
    Delete(usize),
    Server,
    Client,
    Help,
    Quit,
}

impl Input {
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(None);
        };
        let arg = words.next();

        let input = match command {
            "servers" | "ls" => Input::Servers,
            "clients" => Input::Clients,
            "connect" => Input::Connect(index(arg)?),
            "approve" | "yes" => Input::Approve(index(arg)?),
            "reject" | "no" => Input::Reject(index(arg)?),
            "disconnect" => Input::Disconnect(arg.map(|a| index(Some(a))).transpose()?),
            "history" => Input::History,
            "delete" => Input::Delete(index(arg)?),
            "server" => Input::Server,
            "client" => Input::Client,
            "help" | "?" => Input::Help,
            "quit" | "exit" => Input::Quit,
            other => return Err(format!("unknown command: {}", other)),
        };
        Ok(Some(input))
    }
}

fn index(arg: Option<&str>) -> Result<usize, String> {
    let arg = arg.ok_or_else(|| "missing number".to_string())?;
    match arg.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(format!("not a list number: {}", arg)),
    }
}

pub const HELP: &str = "\
  servers            list discovered servers
  clients            list connected clients
  connect <n>        connect to server n
  approve <n>        trust auth request n
  reject <n>         refuse auth request n
  disconnect [<n>]   drop client n, or the server
  history            show clipboard history
  delete <n>         remove history entry n
  server | client    switch role
  quit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Input::parse("connect 2"), Ok(Some(Input::Connect(2))));
        assert_eq!(Input::parse("  approve 1 "), Ok(Some(Input::Approve(1))));
        assert_eq!(Input::parse("disconnect"), Ok(Some(Input::Disconnect(None))));
        assert_eq!(Input::parse("disconnect 3"), Ok(Some(Input::Disconnect(Some(3)))));
        assert_eq!(Input::parse(""), Ok(None));
    }

    #[test]
    fn test_parse_rejects_bad_numbers() {
        assert!(Input::parse("connect").is_err());
        assert!(Input::parse("delete 0").is_err());
        assert!(Input::parse("approve x").is_err());
        assert!(Input::parse("dance").is_err());
    }
}
