//! Splitting a command line into a verb and parameters.
//!
//! A line like `G1 X10 Y-2.5 F3000` has the verb `G1` and parameters `X`, `Y` and
//! `F`. Parameter letters are case-insensitive and may appear in any order; a
//! letter with no number after it is present with the value zero. If a letter
//! appears twice, the first one wins.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    G(u16),
    M(u16),
    T(u8),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Command<'a> {
    pub verb: Option<Verb>,
    params: [Option<f32>; 26],
    /// Everything after the verb, for commands that take a string argument.
    rest: &'a str,
    /// The whole line.
    pub text: &'a str,
}

/// Parses a number at the start of `s` the way `strtod` does, but without
/// exponents, since `E` is an axis. Returns the value and the bytes consumed;
/// zero of each if there is no number.
fn leading_number(s: &str) -> (f32, usize) {
    let bytes = s.as_bytes();
    let mut idx = 0;
    if matches!(bytes.first(), Some(b'-' | b'+')) {
        idx += 1;
    }
    let mut digits = 0;
    while bytes.get(idx).is_some_and(u8::is_ascii_digit) {
        idx += 1;
        digits += 1;
    }
    if bytes.get(idx) == Some(&b'.') {
        idx += 1;
        while bytes.get(idx).is_some_and(u8::is_ascii_digit) {
            idx += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return (0.0, 0);
    }
    match s[..idx].parse::<f32>() {
        Ok(v) => (v, idx),
        Err(_) => (0.0, 0),
    }
}

fn leading_code(s: &str) -> Option<(u16, usize)> {
    let end = s.bytes().take_while(u8::is_ascii_digit).count();
    let code = s[..end].parse().ok()?;
    Some((code, end))
}

impl<'a> Command<'a> {
    pub fn parse(text: &'a str) -> Command<'a> {
        let mut verb = None;
        let mut rest = text;

        // The verb is the first G, M or T that carries a number.
        for (idx, c) in text.char_indices() {
            let family = c.to_ascii_uppercase();
            if !matches!(family, 'G' | 'M' | 'T') {
                continue;
            }
            if let Some((code, len)) = leading_code(&text[idx + 1..]) {
                verb = match family {
                    'G' => Some(Verb::G(code)),
                    'M' => Some(Verb::M(code)),
                    _ => u8::try_from(code).ok().map(Verb::T),
                };
                rest = &text[idx + 1 + len..];
                break;
            }
        }

        let mut params = [None; 26];
        let bytes = rest.as_bytes();
        let mut idx = 0;
        while idx < bytes.len() {
            let c = bytes[idx];
            idx += 1;
            if !c.is_ascii_alphabetic() {
                continue;
            }
            let (value, len) = leading_number(&rest[idx..]);
            idx += len;
            let slot = &mut params[(c.to_ascii_uppercase() - b'A') as usize];
            if slot.is_none() {
                *slot = Some(value);
            }
        }

        Command {
            verb,
            params,
            rest,
            text,
        }
    }

    /// The value of a parameter, if the letter appears.
    pub fn get(&self, letter: char) -> Option<f32> {
        let upper = letter.to_ascii_uppercase();
        if !upper.is_ascii_uppercase() {
            return None;
        }
        self.params[(upper as u8 - b'A') as usize]
    }

    pub fn has(&self, letter: char) -> bool {
        self.get(letter).is_some()
    }

    /// A parameter as a whole number, truncating toward zero.
    pub fn get_int(&self, letter: char) -> Option<i64> {
        self.get(letter).map(|v| v as i64)
    }

    /// The text after the verb with surrounding whitespace removed, for
    /// `M117 <message>` or `M23 <file>`.
    pub fn string_arg(&self) -> &'a str {
        self.rest.trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs() {
        assert_eq!(Command::parse("G1 X10").verb, Some(Verb::G(1)));
        assert_eq!(Command::parse("m105").verb, Some(Verb::M(105)));
        assert_eq!(Command::parse("T1").verb, Some(Verb::T(1)));
        assert_eq!(Command::parse("hello").verb, None);
        // "Go" is not a verb; the M is.
        assert_eq!(Command::parse("Go M117").verb, Some(Verb::M(117)));
    }

    #[test]
    fn params() {
        let cmd = Command::parse("G1 x10 Y-2.5 e.5 F3000 Z");
        assert_eq!(cmd.get('X'), Some(10.0));
        assert_eq!(cmd.get('y'), Some(-2.5));
        assert_eq!(cmd.get('E'), Some(0.5));
        assert_eq!(cmd.get('F'), Some(3000.0));
        assert_eq!(cmd.get('Z'), Some(0.0));
        assert_eq!(cmd.get('S'), None);
        assert_eq!(cmd.get('1'), None);
    }

    #[test]
    fn first_occurrence_wins() {
        let cmd = Command::parse("G1 X1 X2");
        assert_eq!(cmd.get('X'), Some(1.0));
    }

    #[test]
    fn packed_params() {
        let cmd = Command::parse("G1X1Y2E3");
        assert_eq!(cmd.verb, Some(Verb::G(1)));
        assert_eq!(cmd.get('X'), Some(1.0));
        assert_eq!(cmd.get('Y'), Some(2.0));
        assert_eq!(cmd.get('E'), Some(3.0));
    }

    #[test]
    fn string_argument() {
        let cmd = Command::parse("M117 Hello there");
        assert_eq!(cmd.verb, Some(Verb::M(117)));
        assert_eq!(cmd.string_arg(), "Hello there");
        assert_eq!(Command::parse("M23 part.gco").string_arg(), "part.gco");
    }

    #[test]
    fn ints_truncate() {
        assert_eq!(Command::parse("G4 P1500.7").get_int('P'), Some(1500));
        assert_eq!(Command::parse("M104 S-3.9").get_int('S'), Some(-3));
    }
}
