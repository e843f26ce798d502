//! Inbound message from a channel: sender and body extracted from one raw record.

use regex::Regex;
use std::sync::LazyLock;

static ENVELOPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Envelope from: (?:.* )?(\S+) \(device: \d+\) to .+").expect("envelope regex")
});

static BODY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Body: (.+)").expect("body regex"));

/// A message from a channel, to be relayed to a personality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: String,
    pub body: String,
}

/// Extract sender and body from a raw record. Returns None when either line is missing
/// (receipts, typing indicators and the like have no body).
pub fn parse_record(raw: &str) -> Option<InboundMessage> {
    let sender = ENVELOPE_RE.captures(raw)?.get(1)?.as_str();
    let body = BODY_RE.captures(raw)?.get(1)?.as_str().trim_end_matches('\r');
    Some(InboundMessage {
        sender: sender.to_string(),
        body: body.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA_MESSAGE: &str = "Envelope from: \u{201c}Ada\u{201d} +15551234567 (device: 1) to +15550000000\n\
Timestamp: 1718000000000 (2024-06-10T06:13:20.000Z)\n\
Server timestamps: received: 1718000000100 (2024-06-10T06:13:20.100Z) delivered: 1718000000200 (2024-06-10T06:13:20.200Z)\n\
Sent by unidentified/sealed sender\n\
Message timestamp: 1718000000000 (2024-06-10T06:13:20.000Z)\n\
Body: hello\n\
With profile key";

    #[test]
    fn parses_sender_and_body() {
        let msg = parse_record(DATA_MESSAGE).unwrap();
        assert_eq!(
            msg,
            InboundMessage {
                sender: "+15551234567".to_string(),
                body: "hello".to_string(),
            }
        );
    }

    #[test]
    fn envelope_without_display_name() {
        let raw = "Envelope from: +15551234567 (device: 2) to +15550000000\nBody: are you there?";
        let msg = parse_record(raw).unwrap();
        assert_eq!(msg.sender, "+15551234567");
        assert_eq!(msg.body, "are you there?");
    }

    #[test]
    fn body_is_first_line_only() {
        let raw = "Envelope from: Ada +15551234567 (device: 1) to +1555\nBody: line one\nline two";
        assert_eq!(parse_record(raw).unwrap().body, "line one");
    }

    #[test]
    fn receipt_without_body_is_no_match() {
        let raw = "Envelope from: \u{201c}Ada\u{201d} +15551234567 (device: 1) to +15550000000\n\
Timestamp: 1718000000000 (2024-06-10T06:13:20.000Z)\n\
Got receipt.";
        assert_eq!(parse_record(raw), None);
    }

    #[test]
    fn body_without_envelope_is_no_match() {
        assert_eq!(parse_record("Body: orphan"), None);
        assert_eq!(parse_record(""), None);
    }
}
