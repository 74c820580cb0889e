// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event records from the supplicant control interface.
//!
//! An event line looks like `<P>TAG positional… key=value… [flag1|flag2]`.
//! Values recognise balanced `"…"`, `'…'`, and `[…]` pairs, so spaces and
//! `=` inside them do not split tokens. Parsing is lossless: unknown tags
//! keep their raw string, and `to_line` of a parsed event parses back to an
//! equal record.

/// Priority digit carried in the `<P>` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    MsgDump = 0,
    Debug = 1,
    #[default]
    Info = 2,
    Warning = 3,
    Error = 4,
}

impl Priority {
    pub fn from_digit(digit: u32) -> Option<Priority> {
        match digit {
            0 => Some(Priority::MsgDump),
            1 => Some(Priority::Debug),
            2 => Some(Priority::Info),
            3 => Some(Priority::Warning),
            4 => Some(Priority::Error),
            _ => None,
        }
    }

    pub fn digit(&self) -> u32 {
        *self as u32
    }
}

macro_rules! message_kinds {
    ($(($variant:ident, $tag:literal),)*) => {
        /// Tagged message kinds. Tags outside the closed set parse as
        /// `Unknown`, with the raw tag preserved on the event.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub enum MessageKind {
            $($variant,)*
            /// Interactive request (`CTRL-REQ-…`); the remainder of the
            /// line is carried as a single positional parameter.
            CtrlRequest,
            /// Interactive response (`CTRL-RSP-…`).
            CtrlResponse,
            Fail,
            #[default]
            Unknown,
        }

        impl MessageKind {
            pub fn from_tag(tag: &str) -> MessageKind {
                match tag {
                    $($tag => MessageKind::$variant,)*
                    "FAIL" => MessageKind::Fail,
                    _ => MessageKind::Unknown,
                }
            }

            pub fn tag(&self) -> &'static str {
                match self {
                    $(MessageKind::$variant => $tag,)*
                    MessageKind::CtrlRequest => "CTRL-REQ-",
                    MessageKind::CtrlResponse => "CTRL-RSP-",
                    MessageKind::Fail => "FAIL",
                    MessageKind::Unknown => "UNKNOWN",
                }
            }
        }
    };
}

message_kinds! {
    (P2pDeviceFound, "P2P-DEVICE-FOUND"),
    (P2pDeviceLost, "P2P-DEVICE-LOST"),
    (P2pFindStopped, "P2P-FIND-STOPPED"),
    (P2pGoNegRequest, "P2P-GO-NEG-REQUEST"),
    (P2pGoNegSuccess, "P2P-GO-NEG-SUCCESS"),
    (P2pGoNegFailure, "P2P-GO-NEG-FAILURE"),
    (P2pGroupFormationSuccess, "P2P-GROUP-FORMATION-SUCCESS"),
    (P2pGroupFormationFailure, "P2P-GROUP-FORMATION-FAILURE"),
    (P2pGroupStarted, "P2P-GROUP-STARTED"),
    (P2pGroupRemoved, "P2P-GROUP-REMOVED"),
    (P2pProvDiscPbcReq, "P2P-PROV-DISC-PBC-REQ"),
    (P2pProvDiscPbcResp, "P2P-PROV-DISC-PBC-RESP"),
    (P2pProvDiscShowPin, "P2P-PROV-DISC-SHOW-PIN"),
    (P2pProvDiscEnterPin, "P2P-PROV-DISC-ENTER-PIN"),
    (P2pProvDiscFailure, "P2P-PROV-DISC-FAILURE"),
    (P2pInvitationReceived, "P2P-INVITATION-RECEIVED"),
    (P2pInvitationResult, "P2P-INVITATION-RESULT"),
    (P2pInvitationAccepted, "P2P-INVITATION-ACCEPTED"),
    (P2pServDiscReq, "P2P-SERV-DISC-REQ"),
    (P2pServDiscResp, "P2P-SERV-DISC-RESP"),
    (P2pPresenceResponse, "P2P-PRESENCE-RESPONSE"),
    (ApStaConnected, "AP-STA-CONNECTED"),
    (ApStaDisconnected, "AP-STA-DISCONNECTED"),
    (ApStaPollOk, "AP-STA-POLL-OK"),
    (ApEnabled, "AP-ENABLED"),
    (ApDisabled, "AP-DISABLED"),
    (WpsEnrolleeSeen, "WPS-ENROLLEE-SEEN"),
    (WpsRegSuccess, "WPS-REG-SUCCESS"),
    (WpsSuccess, "WPS-SUCCESS"),
    (WpsFail, "WPS-FAIL"),
    (WpsTimeout, "WPS-TIMEOUT"),
    (WpsOverlapDetected, "WPS-OVERLAP-DETECTED"),
    (WpsPbcActive, "WPS-PBC-ACTIVE"),
    (WpsPbcDisable, "WPS-PBC-DISABLE"),
    (CtrlEventConnected, "CTRL-EVENT-CONNECTED"),
    (CtrlEventDisconnected, "CTRL-EVENT-DISCONNECTED"),
    (CtrlEventScanStarted, "CTRL-EVENT-SCAN-STARTED"),
    (CtrlEventScanResults, "CTRL-EVENT-SCAN-RESULTS"),
    (CtrlEventScanFailed, "CTRL-EVENT-SCAN-FAILED"),
    (CtrlEventTerminating, "CTRL-EVENT-TERMINATING"),
    (CtrlEventEapStarted, "CTRL-EVENT-EAP-STARTED"),
    (CtrlEventEapSuccess, "CTRL-EVENT-EAP-SUCCESS"),
    (CtrlEventEapFailure, "CTRL-EVENT-EAP-FAILURE"),
    (CtrlEventNetworkNotFound, "CTRL-EVENT-NETWORK-NOT-FOUND"),
    (CtrlEventBssAdded, "CTRL-EVENT-BSS-ADDED"),
    (CtrlEventBssRemoved, "CTRL-EVENT-BSS-REMOVED"),
}

/// One parsed event line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Event {
    pub priority: Priority,
    pub kind: MessageKind,
    /// Raw tag text, kept for `Unknown` and `Fail` kinds.
    pub raw_kind: String,
    pub args: Vec<String>,
    pub named: Vec<(String, String)>,
    pub flags: Vec<String>,
}

impl Event {
    /// Parse one event line. Returns `None` for lines that are not events
    /// (no `<P>` prefix, bad priority digit, or empty after the prompt).
    pub fn parse(line: &str) -> Option<Event> {
        let bytes = line.as_bytes();
        let mut at = 0usize;
        // Ignore an interactive prompt.
        if bytes.first() == Some(&b'>') {
            at += 1;
        }
        if at >= bytes.len() || bytes[at] != b'<' {
            return None;
        }
        at += 1;
        let mut priority_value: u32 = 0;
        let mut digits = 0;
        while at < bytes.len() && bytes[at].is_ascii_digit() {
            priority_value = priority_value * 10 + u32::from(bytes[at] - b'0');
            at += 1;
            digits += 1;
        }
        if digits == 0 || at >= bytes.len() || bytes[at] != b'>' {
            return None;
        }
        at += 1;
        let priority = Priority::from_digit(priority_value)?;
        let rest = &line[at..];

        let mut event = Event { priority, ..Event::default() };

        // Interactive request/response lines carry free-form text; keep the
        // whole remainder as one positional parameter.
        if rest.starts_with("CTRL-REQ-") {
            event.kind = MessageKind::CtrlRequest;
            event.args.push(rest.to_string());
            return Some(event);
        }
        if rest.starts_with("CTRL-RSP-") {
            event.kind = MessageKind::CtrlResponse;
            event.args.push(rest.to_string());
            return Some(event);
        }

        let tag_end = rest.find(' ').unwrap_or(rest.len());
        let tag = &rest[..tag_end];
        event.kind = MessageKind::from_tag(tag);
        if matches!(event.kind, MessageKind::Unknown | MessageKind::Fail) {
            event.raw_kind = tag.to_string();
        }

        let mut tokens = rest[tag_end..].as_bytes();
        loop {
            while tokens.first() == Some(&b' ') {
                tokens = &tokens[1..];
            }
            if tokens.is_empty() {
                break;
            }
            if tokens[0] == b'[' {
                // Flag block: [a|b|c], surrounding whitespace trimmed.
                let close = find_byte(tokens, b']').unwrap_or(tokens.len());
                let body = string_of(&tokens[1..close]);
                for flag in body.split('|') {
                    let flag = flag.trim();
                    if !flag.is_empty() {
                        event.flags.push(flag.to_string());
                    }
                }
                tokens = &tokens[(close + 1).min(tokens.len())..];
                continue;
            }
            if let Some(end) = balanced_end(tokens) {
                event.args.push(string_of(&tokens[..end]));
                tokens = &tokens[end..];
                continue;
            }
            // Bare token: positional, or key=value with a balanced value.
            let mut index = 0;
            let mut equals = None;
            while index < tokens.len() && tokens[index] != b' ' {
                if tokens[index] == b'=' && equals.is_none() {
                    equals = Some(index);
                    index += 1;
                    if let Some(length) = balanced_end(&tokens[index..]) {
                        index += length;
                        break;
                    }
                    continue;
                }
                index += 1;
            }
            match equals {
                Some(eq) => {
                    event
                        .named
                        .push((string_of(&tokens[..eq]), string_of(&tokens[eq + 1..index])));
                }
                None => event.args.push(string_of(&tokens[..index])),
            }
            tokens = &tokens[index..];
        }
        Some(event)
    }

    /// Serialise back to wire form. Parsing the result yields an event equal
    /// in priority, kind, positional, named, and flags sections.
    pub fn to_line(&self) -> String {
        let mut out = String::new();
        out.push('<');
        out.push_str(&self.priority.digit().to_string());
        out.push('>');
        match self.kind {
            // Interactive lines carry their whole text as the first
            // positional parameter, tag included.
            MessageKind::CtrlRequest | MessageKind::CtrlResponse => {
                out.push_str(self.arg(0));
                return out;
            }
            MessageKind::Unknown | MessageKind::Fail if !self.raw_kind.is_empty() => {
                out.push_str(&self.raw_kind);
            }
            kind => out.push_str(kind.tag()),
        }
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        for (key, value) in &self.named {
            out.push(' ');
            out.push_str(key);
            out.push('=');
            out.push_str(value);
        }
        if !self.flags.is_empty() {
            out.push_str(" [");
            out.push_str(&self.flags.join("|"));
            out.push(']');
        }
        out
    }

    /// Positional parameter by index; empty when absent.
    pub fn arg(&self, index: usize) -> &str {
        self.args.get(index).map(String::as_str).unwrap_or("")
    }

    /// First `key=value` parameter with the given key.
    pub fn named(&self, name: &str) -> Option<&str> {
        self.named
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Numeric named parameter; handles decimal and `0x` hex literals.
    pub fn numeric(&self, name: &str) -> Option<u64> {
        let value = self.named(name)?;
        match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => value.parse().ok(),
        }
    }

    pub fn numeric_or(&self, name: &str, default: u64) -> u64 {
        self.numeric(name).unwrap_or(default)
    }
}

fn string_of(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn find_byte(bytes: &[u8], needle: u8) -> Option<usize> {
    bytes.iter().position(|&b| b == needle)
}

/// Length of a balanced `"…"`, `'…'`, or `[…]` token at the start of
/// `bytes`, including both delimiters. `None` when `bytes` does not start
/// with an opening delimiter.
fn balanced_end(bytes: &[u8]) -> Option<usize> {
    let terminator = match bytes.first() {
        Some(b'"') => b'"',
        Some(b'\'') => b'\'',
        Some(b'[') => b']',
        _ => return None,
    };
    let mut index = 1;
    while index < bytes.len() && bytes[index] != terminator {
        index += 1;
    }
    if index < bytes.len() {
        index += 1;
    }
    Some(index)
}

/// Quote `value`, escaping the quote character and backslashes.
pub fn quote(value: &str, quote_char: char) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push(quote_char);
    for c in value.chars() {
        if c == quote_char || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push(quote_char);
    out
}

/// Strip one level of `'` or `"` quoting, undoing backslash escapes.
/// Unquoted input is returned unchanged.
pub fn unquote(value: &str) -> String {
    let mut chars = value.chars();
    let quote_char = match chars.next() {
        Some(c @ ('\'' | '"')) => c,
        _ => return value.to_string(),
    };
    let mut out = String::with_capacity(value.len());
    let mut escaped = false;
    for c in chars {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
            continue;
        }
        if c == quote_char {
            break;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
