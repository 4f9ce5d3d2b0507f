use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// X12 delimiters, self-described by the ISA segment. Never hard-coded when
/// reading: the tokenizer recovers them from fixed ISA byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    /// Element separator (ISA byte 3, typically '*')
    pub element: u8,
    /// Component separator (ISA16, byte 104, typically ':')
    pub component: u8,
    /// Repetition separator (ISA11, byte 82, typically '^')
    pub repetition: u8,
    /// Segment terminator (byte 105, typically '~')
    pub segment: u8,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            element: b'*',
            component: b':',
            repetition: b'^',
            segment: b'~',
        }
    }
}

/// One element of a segment: an ordered list of components. A simple element
/// has exactly one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub components: Vec<String>,
}

impl Element {
    pub fn simple(value: impl Into<String>) -> Self {
        Self {
            components: vec![value.into()],
        }
    }

    pub fn composite(components: Vec<String>) -> Self {
        Self { components }
    }

    /// First component, or the whole value for a simple element.
    pub fn value(&self) -> &str {
        self.components.first().map(String::as_str).unwrap_or("")
    }

    pub fn component(&self, index: usize) -> &str {
        self.components.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.components.iter().all(|c| c.is_empty())
    }
}

/// An ordered sequence of elements where element 0 is the segment identifier.
/// Invariant: a segment always has at least one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub elements: Vec<Element>,
}

impl Segment {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            elements: vec![Element::simple(id.into())],
        }
    }

    /// Append a simple element, builder style.
    pub fn with(mut self, value: impl Into<String>) -> Self {
        self.elements.push(Element::simple(value.into()));
        self
    }

    /// Append a composite element, builder style.
    pub fn with_composite(mut self, components: &[&str]) -> Self {
        self.elements.push(Element::composite(
            components.iter().map(|c| c.to_string()).collect(),
        ));
        self
    }

    pub fn id(&self) -> &str {
        self.elements.first().map(Element::value).unwrap_or("")
    }

    /// Element by X12 number: `element(1)` is the first data element (e.g. CLP01).
    pub fn element(&self, number: usize) -> Option<&Element> {
        self.elements.get(number)
    }

    /// Element value by X12 number, empty string when absent.
    pub fn element_str(&self, number: usize) -> &str {
        self.element(number).map(Element::value).unwrap_or("")
    }

    /// Component value within an element, empty string when absent.
    pub fn component_str(&self, number: usize, component: usize) -> &str {
        self.element(number)
            .map(|e| e.component(component))
            .unwrap_or("")
    }

    /// Wire form using the given delimiters; trailing empty elements are
    /// trimmed, the terminator is not included.
    pub fn serialize(&self, delimiters: &Delimiters) -> String {
        let element_sep = (delimiters.element as char).to_string();
        let component_sep = (delimiters.component as char).to_string();
        let mut last = self.elements.len();
        while last > 1 && self.elements[last - 1].is_empty() {
            last -= 1;
        }
        self.elements[..last]
            .iter()
            .map(|e| e.components.join(&component_sep))
            .collect::<Vec<_>>()
            .join(&element_sep)
    }
}

/// A node in a transaction body: either a bare segment or a named loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Segment(Segment),
    Loop(Loop),
}

/// A named, possibly nested, ordered grouping of segments and child loops.
/// A loop owns its children; no sharing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loop {
    pub id: String,
    pub nodes: Vec<Node>,
}

impl Loop {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
        }
    }

    pub fn push_segment(&mut self, segment: Segment) {
        self.nodes.push(Node::Segment(segment));
    }

    pub fn push_loop(&mut self, child: Loop) {
        self.nodes.push(Node::Loop(child));
    }

    /// All segments in this loop, depth first.
    pub fn segments(&self) -> Vec<&Segment> {
        let mut out = Vec::new();
        collect_segments(&self.nodes, &mut out);
        out
    }

    /// First directly-owned segment with the given identifier.
    pub fn segment(&self, id: &str) -> Option<&Segment> {
        self.nodes.iter().find_map(|n| match n {
            Node::Segment(s) if s.id() == id => Some(s),
            _ => None,
        })
    }

    /// Directly-owned child loops with the given identifier.
    pub fn loops(&self, id: &str) -> Vec<&Loop> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Loop(l) if l.id == id => Some(l),
                _ => None,
            })
            .collect()
    }
}

/// ISA fields are fixed width: overlong values are truncated, short ones
/// space padded, so the serialized ISA is always exactly 106 bytes.
fn fixed(value: &str, width: usize) -> String {
    let truncated: String = value.chars().take(width).collect();
    format!("{truncated:<width$}")
}

fn collect_segments<'a>(nodes: &'a [Node], out: &mut Vec<&'a Segment>) {
    for node in nodes {
        match node {
            Node::Segment(s) => out.push(s),
            Node::Loop(l) => collect_segments(&l.nodes, out),
        }
    }
}

/// Closed set of transaction types this engine parses or generates. Adding a
/// segment subset for a new type means extending this enum and the matching
/// parser/generator dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Claim837P,
    Claim837I,
    Remittance835,
    EligibilityInquiry270,
    EligibilityResponse271,
}

impl TransactionType {
    /// Transaction set identifier code (ST01).
    pub fn code(&self) -> &'static str {
        match self {
            TransactionType::Claim837P | TransactionType::Claim837I => "837",
            TransactionType::Remittance835 => "835",
            TransactionType::EligibilityInquiry270 => "270",
            TransactionType::EligibilityResponse271 => "271",
        }
    }

    /// Implementation convention reference (ST03 / GS08).
    pub fn convention(&self) -> &'static str {
        match self {
            TransactionType::Claim837P => "005010X222A1",
            TransactionType::Claim837I => "005010X223A2",
            TransactionType::Remittance835 => "005010X221A1",
            TransactionType::EligibilityInquiry270 | TransactionType::EligibilityResponse271 => {
                "005010X279A1"
            }
        }
    }

    /// Functional identifier code (GS01).
    pub fn functional_id(&self) -> &'static str {
        match self {
            TransactionType::Claim837P | TransactionType::Claim837I => "HC",
            TransactionType::Remittance835 => "HP",
            TransactionType::EligibilityInquiry270 => "HS",
            TransactionType::EligibilityResponse271 => "HB",
        }
    }

    /// Resolve from ST01 and ST03. `institutional_hint` breaks the 837 tie
    /// when ST03 is absent (drawn from segment contents by the tokenizer).
    pub fn from_st(
        code: &str,
        convention: &str,
        institutional_hint: bool,
    ) -> std::result::Result<Self, ParseError> {
        match code {
            "837" if convention.contains("X223") => Ok(TransactionType::Claim837I),
            "837" if convention.contains("X222") => Ok(TransactionType::Claim837P),
            "837" if institutional_hint => Ok(TransactionType::Claim837I),
            "837" => Ok(TransactionType::Claim837P),
            "835" => Ok(TransactionType::Remittance835),
            "270" => Ok(TransactionType::EligibilityInquiry270),
            "271" => Ok(TransactionType::EligibilityResponse271),
            other => Err(ParseError::UnsupportedTransaction(other.to_string())),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Claim837P => write!(f, "837P"),
            TransactionType::Claim837I => write!(f, "837I"),
            TransactionType::Remittance835 => write!(f, "835"),
            TransactionType::EligibilityInquiry270 => write!(f, "270"),
            TransactionType::EligibilityResponse271 => write!(f, "271"),
        }
    }
}

/// One functional business document. Nodes exclude the ST/SE pair, which the
/// serializer re-emits with the correct segment count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txn_type: TransactionType,
    pub control_number: String,
    pub nodes: Vec<Node>,
}

impl Transaction {
    pub fn new(txn_type: TransactionType, control_number: impl Into<String>) -> Self {
        Self {
            txn_type,
            control_number: control_number.into(),
            nodes: Vec::new(),
        }
    }

    pub fn push_segment(&mut self, segment: Segment) {
        self.nodes.push(Node::Segment(segment));
    }

    pub fn push_loop(&mut self, body: Loop) {
        self.nodes.push(Node::Loop(body));
    }

    /// All segments in document order, depth first, excluding ST/SE.
    pub fn segments(&self) -> Vec<&Segment> {
        let mut out = Vec::new();
        collect_segments(&self.nodes, &mut out);
        out
    }

    /// First segment anywhere in the body with the given identifier.
    pub fn find_segment(&self, id: &str) -> Option<&Segment> {
        self.segments().into_iter().find(|s| s.id() == id)
    }

    /// Top-level loops with the given identifier.
    pub fn loops(&self, id: &str) -> Vec<&Loop> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Loop(l) if l.id == id => Some(l),
                _ => None,
            })
            .collect()
    }

    /// Segment count including the ST/SE pair, as declared in SE01.
    pub fn segment_count(&self) -> usize {
        self.segments().len() + 2
    }
}

/// Application-level batch of transactions (GS/GE).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionalGroup {
    pub functional_id: String,
    pub sender_code: String,
    pub receiver_code: String,
    /// CCYYMMDD
    pub date: String,
    /// HHMM
    pub time: String,
    pub control_number: String,
    pub version: String,
    pub transactions: Vec<Transaction>,
}

/// Interchange-level routing (ISA/IEA): sender/receiver, control number and
/// the delimiter set used on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub delimiters: Delimiters,
    pub sender_qualifier: String,
    pub sender_id: String,
    pub receiver_qualifier: String,
    pub receiver_id: String,
    /// YYMMDD
    pub date: String,
    /// HHMM
    pub time: String,
    pub version: String,
    pub control_number: String,
    /// P = production, T = test (ISA15)
    pub usage_indicator: String,
    pub groups: Vec<FunctionalGroup>,
}

impl Envelope {
    /// Envelope around a single transaction, the shape the services emit.
    pub fn single(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        control_number: u64,
        stamp: NaiveDateTime,
        transaction: Transaction,
    ) -> Self {
        let txn_type = transaction.txn_type;
        let group = FunctionalGroup {
            functional_id: txn_type.functional_id().to_string(),
            sender_code: sender_id.into(),
            receiver_code: receiver_id.into(),
            date: stamp.format("%Y%m%d").to_string(),
            time: stamp.format("%H%M").to_string(),
            control_number: control_number.to_string(),
            version: txn_type.convention().to_string(),
            transactions: vec![transaction],
        };
        Self {
            delimiters: Delimiters::default(),
            sender_qualifier: "ZZ".to_string(),
            sender_id: group.sender_code.clone(),
            receiver_qualifier: "ZZ".to_string(),
            receiver_id: group.receiver_code.clone(),
            date: stamp.format("%y%m%d").to_string(),
            time: stamp.format("%H%M").to_string(),
            version: "00501".to_string(),
            control_number: format!("{control_number:09}"),
            usage_indicator: "P".to_string(),
            groups: vec![group],
        }
    }

    /// First transaction of the given type anywhere in the interchange.
    pub fn find_transaction(&self, txn_type: TransactionType) -> Option<&Transaction> {
        self.groups
            .iter()
            .flat_map(|g| g.transactions.iter())
            .find(|t| t.txn_type == txn_type)
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.groups.iter().flat_map(|g| g.transactions.iter())
    }

    fn isa_text(&self) -> String {
        let e = self.delimiters.element as char;
        let r = self.delimiters.repetition as char;
        let c = self.delimiters.component as char;
        let t = self.delimiters.segment as char;
        // ISA13 is right-aligned and zero padded; an overlong control number
        // keeps its least significant digits.
        let ctrl = if self.control_number.len() > 9 {
            self.control_number[self.control_number.len() - 9..].to_string()
        } else {
            format!("{:0>9}", self.control_number)
        };
        format!(
            "ISA{e}00{e}{auth}{e}00{e}{sec}{e}{sq}{e}{sid}{e}{rq}{e}{rid}{e}{date}{e}{time}{e}{r}{e}{version}{e}{ctrl}{e}0{e}{usage}{e}{c}{t}",
            auth = fixed("", 10),
            sec = fixed("", 10),
            sq = fixed(&self.sender_qualifier, 2),
            sid = fixed(&self.sender_id, 15),
            rq = fixed(&self.receiver_qualifier, 2),
            rid = fixed(&self.receiver_id, 15),
            date = fixed(&self.date, 6),
            time = fixed(&self.time, 4),
            version = fixed(&self.version, 5),
            usage = fixed(&self.usage_indicator, 1),
        )
    }

    /// Serialize the full interchange to wire text using this envelope's own
    /// delimiters. ST/SE, GE and IEA counts are derived from the tree so the
    /// output always satisfies the trailer integrity checks.
    pub fn serialize(&self) -> String {
        let e = self.delimiters.element as char;
        let t = self.delimiters.segment as char;
        let mut out = String::new();
        out.push_str(&self.isa_text());
        for group in &self.groups {
            out.push_str(&format!(
                "GS{e}{}{e}{}{e}{}{e}{}{e}{}{e}{}{e}X{e}{}{t}",
                group.functional_id,
                group.sender_code,
                group.receiver_code,
                group.date,
                group.time,
                group.control_number,
                group.version,
            ));
            for txn in &group.transactions {
                out.push_str(&format!(
                    "ST{e}{}{e}{}{e}{}{t}",
                    txn.txn_type.code(),
                    txn.control_number,
                    txn.txn_type.convention(),
                ));
                for segment in txn.segments() {
                    out.push_str(&segment.serialize(&self.delimiters));
                    out.push(t);
                }
                out.push_str(&format!(
                    "SE{e}{}{e}{}{t}",
                    txn.segment_count(),
                    txn.control_number,
                ));
            }
            out.push_str(&format!(
                "GE{e}{}{e}{}{t}",
                group.transactions.len(),
                group.control_number,
            ));
        }
        out.push_str(&format!(
            "IEA{e}{}{e}{}{t}",
            self.groups.len(),
            self.control_number,
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_builder_and_accessors() {
        let seg = Segment::new("NM1")
            .with("IL")
            .with("1")
            .with("DOE")
            .with("JOHN");
        assert_eq!(seg.id(), "NM1");
        assert_eq!(seg.element_str(1), "IL");
        assert_eq!(seg.element_str(3), "DOE");
        assert_eq!(seg.element_str(9), "");
    }

    #[test]
    fn test_segment_serialize_trims_trailing_empties() {
        let seg = Segment::new("DTP").with("472").with("D8").with("").with("");
        assert_eq!(seg.serialize(&Delimiters::default()), "DTP*472*D8");
    }

    #[test]
    fn test_composite_element_round_trip() {
        let seg = Segment::new("SV1")
            .with_composite(&["HC", "99213", "25"])
            .with("125.50");
        assert_eq!(seg.serialize(&Delimiters::default()), "SV1*HC:99213:25*125.50");
        assert_eq!(seg.component_str(1, 1), "99213");
        assert_eq!(seg.component_str(1, 2), "25");
    }

    #[test]
    fn test_isa_text_is_fixed_width() {
        let stamp = NaiveDateTime::parse_from_str("2024-03-15 14:30", "%Y-%m-%d %H:%M")
            .expect("valid stamp");
        let txn = Transaction::new(TransactionType::Remittance835, "0001");
        let envelope = Envelope::single("SENDER", "RECEIVER", 42, stamp, txn);
        let isa = envelope.isa_text();
        assert_eq!(isa.len(), 106);
        // ISA02/ISA04 are ten-space authorization/security fields.
        assert!(isa.starts_with("ISA*00*          *00*          *ZZ*SENDER"));
        // Delimiters sit at their fixed byte offsets.
        let bytes = isa.as_bytes();
        assert_eq!(bytes[3], b'*');
        assert_eq!(bytes[82], b'^');
        assert_eq!(bytes[104], b':');
        assert_eq!(bytes[105], b'~');
    }

    #[test]
    fn test_isa_truncates_overlong_routing_ids() {
        let stamp = NaiveDateTime::parse_from_str("2024-03-15 14:30", "%Y-%m-%d %H:%M")
            .expect("valid stamp");
        let txn = Transaction::new(TransactionType::Remittance835, "0001");
        let envelope = Envelope::single(
            "A SENDER ID WELL BEYOND FIFTEEN",
            "RECEIVER",
            42,
            stamp,
            txn,
        );
        let isa = envelope.isa_text();
        assert_eq!(isa.len(), 106);
        assert_eq!(isa.as_bytes()[82], b'^');
        assert_eq!(isa.as_bytes()[105], b'~');
    }

    #[test]
    fn test_serialized_envelope_round_trips_through_tokenizer() {
        let stamp = NaiveDateTime::parse_from_str("2024-03-15 14:30", "%Y-%m-%d %H:%M")
            .expect("valid stamp");
        let mut txn = Transaction::new(TransactionType::Remittance835, "0001");
        txn.push_segment(Segment::new("BPR").with("I").with("100.40").with("C"));
        let envelope = Envelope::single("SENDER", "RECEIVER", 42, stamp, txn);
        let parsed = crate::tokenizer::tokenize(&envelope.serialize()).expect("round trip");
        assert_eq!(parsed.sender_id, "SENDER");
        assert_eq!(parsed.control_number, "000000042");
        let txn = parsed
            .find_transaction(TransactionType::Remittance835)
            .expect("835");
        assert_eq!(txn.find_segment("BPR").expect("BPR").element_str(2), "100.40");
    }

    #[test]
    fn test_transaction_type_from_st() {
        assert_eq!(
            TransactionType::from_st("837", "005010X222A1", false),
            Ok(TransactionType::Claim837P)
        );
        assert_eq!(
            TransactionType::from_st("837", "005010X223A2", false),
            Ok(TransactionType::Claim837I)
        );
        assert_eq!(
            TransactionType::from_st("837", "", true),
            Ok(TransactionType::Claim837I)
        );
        assert_eq!(
            TransactionType::from_st("835", "", false),
            Ok(TransactionType::Remittance835)
        );
        assert!(TransactionType::from_st("999", "", false).is_err());
    }

    #[test]
    fn test_loop_segments_depth_first() {
        let mut inner = Loop::new("LX");
        inner.push_segment(Segment::new("LX").with("1"));
        inner.push_segment(Segment::new("SV1"));
        let mut outer = Loop::new("CLM");
        outer.push_segment(Segment::new("CLM").with("C1"));
        outer.push_loop(inner);
        let ids: Vec<&str> = outer.segments().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["CLM", "LX", "SV1"]);
    }
}
