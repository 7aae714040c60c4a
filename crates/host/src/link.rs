//! The serial link between the simulated printer and its host.

use std::{
    cell::RefCell,
    collections::VecDeque,
    io::Write as _,
    rc::Rc,
};

use scarab_firmware::hal::{ResponseSink, SerialPort};
use scarab_protocol::{framer::checksum, Response};

#[derive(Debug, Default)]
struct LinkState {
    incoming: VecDeque<u8>,
    acks: u32,
    resend: Option<i64>,
    echo: bool,
}

/// Both ends of the link. The firmware reads bytes from it and writes responses
/// to it; responses are printed to stdout and the acknowledgements are counted for
/// the sender.
#[derive(Clone, Debug, Default)]
pub struct Link {
    state: Rc<RefCell<LinkState>>,
}

/// What the firmware said since we last asked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Feedback {
    pub acks: u32,
    pub resend: Option<i64>,
}

impl Link {
    /// A link that does not print responses.
    pub fn quiet() -> Self {
        Link::default()
    }

    pub fn printing() -> Self {
        let link = Link::default();
        link.state.borrow_mut().echo = true;
        link
    }

    pub fn send_line(&self, line: &str) {
        log::debug!("> {line}");
        let mut state = self.state.borrow_mut();
        state.incoming.extend(line.bytes());
        state.incoming.push_back(b'\n');
    }

    pub fn is_drained(&self) -> bool {
        self.state.borrow().incoming.is_empty()
    }

    pub fn take_feedback(&self) -> Feedback {
        let mut state = self.state.borrow_mut();
        Feedback {
            acks: std::mem::take(&mut state.acks),
            resend: state.resend.take(),
        }
    }
}

impl SerialPort for Link {
    fn read_byte(&mut self) -> Option<u8> {
        self.state.borrow_mut().incoming.pop_front()
    }

    fn flush(&mut self) {
        self.state.borrow_mut().incoming.clear();
    }
}

impl ResponseSink for Link {
    fn send(&mut self, response: &Response<'_>) {
        let text = response.to_string();
        let mut state = self.state.borrow_mut();
        match response {
            Response::Resend(n) => state.resend = Some(*n),
            // Temperature reports double as the acknowledgement.
            _ if text == "ok" || text.starts_with("ok ") => state.acks += 1,
            _ => {}
        }
        if state.echo {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{text}") {
                log::error!("writing response: {e}");
            }
        }
    }
}

/// Adds a line number and checksum, the way hosts send lines they want resent on
/// corruption.
pub fn numbered(n: usize, body: &str) -> String {
    let line = format!("N{n} {body}");
    let sum = checksum(line.as_bytes());
    format!("{line}*{sum}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_acks_and_resends() {
        let mut link = Link::quiet();
        link.send(&Response::Ok);
        link.send(&Response::Raw(format_args!("ok T:20.0 /0.0 B:20.0 /0.0 @:0 B@:0")));
        link.send(&Response::Raw(format_args!("okay then")));
        link.send(&Response::Resend(7));
        assert_eq!(
            link.take_feedback(),
            Feedback {
                acks: 2,
                resend: Some(7)
            }
        );
        assert_eq!(link.take_feedback(), Feedback::default());
    }

    #[test]
    fn bytes_come_out_in_order() {
        let mut link = Link::quiet();
        link.send_line("G28");
        let bytes: Vec<u8> = std::iter::from_fn(|| link.read_byte()).collect();
        assert_eq!(bytes, b"G28\n");
        assert!(link.is_drained());

        link.send_line("G1 X1");
        link.flush();
        assert!(link.is_drained());
        assert_eq!(link.read_byte(), None);
    }

    #[test]
    fn numbered_lines() {
        let line = numbered(3, "G1 X5");
        let (body, sum) = line.split_once('*').unwrap();
        assert_eq!(body, "N3 G1 X5");
        assert_eq!(sum.parse::<u8>().unwrap(), checksum(body.as_bytes()));
    }
}
