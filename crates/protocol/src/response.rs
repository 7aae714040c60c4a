use core::fmt;

/// One line sent back to the host.
#[derive(Clone, Copy, Debug)]
pub enum Response<'a> {
    /// The command is done and the host may send another.
    Ok,
    Error(fmt::Arguments<'a>),
    /// Asks the host to send everything again starting from this line number.
    Resend(i64),
    /// Informational output.
    Echo(fmt::Arguments<'a>),
    /// A report line with no prefix, like `ok T:20.0 B:20.0` or `X:0.00 Y:0.00`.
    Raw(fmt::Arguments<'a>),
}

impl fmt::Display for Response<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok => f.write_str("ok"),
            Response::Error(msg) => write!(f, "Error:{msg}"),
            Response::Resend(line) => write!(f, "Resend:{line}"),
            Response::Echo(msg) => write!(f, "echo:{msg}"),
            Response::Raw(msg) => write!(f, "{msg}"),
        }
    }
}

/// Where responses go.
pub trait ResponseSink {
    fn send(&mut self, response: &Response<'_>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatting() {
        assert_eq!(Response::Ok.to_string(), "ok");
        assert_eq!(Response::Resend(5).to_string(), "Resend:5");
        assert_eq!(
            Response::Error(format_args!("checksum mismatch, Last Line: {}", 4)).to_string(),
            "Error:checksum mismatch, Last Line: 4"
        );
        assert_eq!(
            Response::Echo(format_args!("Active Extruder: {}", 1)).to_string(),
            "echo:Active Extruder: 1"
        );
    }
}
