use crate::error::{MIN_ISA_LEN, ParseError};
use crate::model::{
    Delimiters, Element, Envelope, FunctionalGroup, Loop, Node, Segment, Transaction,
    TransactionType,
};

enum OpenerKind {
    Hl { id: String },
    Clm,
    Lx,
    Clp,
}

/// Segments that open a loop inside a transaction body. `HL` nests by its
/// HL02 parent reference; the others open flat repeating loops. Adding
/// support for a new loop kind means extending this dispatch.
fn opener_kind(segment: &Segment) -> Option<OpenerKind> {
    match segment.id() {
        "HL" => Some(OpenerKind::Hl {
            id: segment.element_str(1).to_string(),
        }),
        "CLM" => Some(OpenerKind::Clm),
        "LX" => Some(OpenerKind::Lx),
        "CLP" => Some(OpenerKind::Clp),
        _ => None,
    }
}

/// Split a raw interchange into an `Envelope` tree. Pure: no side effects,
/// and tokenizing the same text twice yields structurally identical trees.
///
/// Delimiters are read from the ISA segment itself: element separator at
/// byte 3, repetition separator at byte 82 (ISA11), component separator at
/// byte 104 (ISA16), segment terminator at byte 105.
pub fn tokenize(input: &str) -> Result<Envelope, ParseError> {
    let bytes = input.as_bytes();
    if bytes.len() < MIN_ISA_LEN {
        return Err(ParseError::Truncated(bytes.len()));
    }
    if &bytes[0..3] != b"ISA" {
        return Err(ParseError::MissingIsa);
    }
    let delimiters = Delimiters {
        element: bytes[3],
        repetition: bytes[82],
        component: bytes[104],
        segment: bytes[105],
    };
    if delimiters.element == delimiters.component
        || delimiters.element == delimiters.segment
        || delimiters.component == delimiters.segment
    {
        return Err(ParseError::IndistinctDelimiters);
    }

    let segments = split_segments(input, &delimiters)?;
    build_envelope(segments, delimiters)
}

/// Split on the segment terminator, then the element separator, then the
/// component separator. The ISA segment is exempt from component splitting
/// because ISA16 *is* the component separator.
fn split_segments(input: &str, delimiters: &Delimiters) -> Result<Vec<Segment>, ParseError> {
    let terminator = delimiters.segment as char;
    let element_sep = delimiters.element as char;
    let component_sep = delimiters.component as char;

    let mut segments = Vec::new();
    for (position, raw) in input.split(terminator).enumerate() {
        // Terminators are often followed by newlines for readability.
        let raw = raw.trim_matches(|c| c == '\r' || c == '\n');
        if raw.is_empty() {
            continue;
        }
        let is_isa = raw.starts_with("ISA");
        let mut elements = Vec::new();
        for (index, chunk) in raw.split(element_sep).enumerate() {
            if index == 0 || is_isa {
                elements.push(Element::simple(chunk));
            } else {
                elements.push(Element::composite(
                    chunk.split(component_sep).map(str::to_string).collect(),
                ));
            }
        }
        let segment = Segment { elements };
        if segment.id().is_empty() {
            return Err(ParseError::EmptySegment(position));
        }
        segments.push(segment);
    }
    Ok(segments)
}

fn build_envelope(segments: Vec<Segment>, delimiters: Delimiters) -> Result<Envelope, ParseError> {
    let Some(isa) = segments.first().filter(|s| s.id() == "ISA") else {
        return Err(ParseError::MissingIsa);
    };
    if isa.elements.len() < 17 {
        return Err(ParseError::InvalidElement {
            segment: "ISA",
            element: isa.elements.len(),
            reason: "ISA must carry 16 elements".to_string(),
        });
    }
    let mut envelope = Envelope {
        delimiters,
        sender_qualifier: isa.element_str(5).trim().to_string(),
        sender_id: isa.element_str(6).trim().to_string(),
        receiver_qualifier: isa.element_str(7).trim().to_string(),
        receiver_id: isa.element_str(8).trim().to_string(),
        date: isa.element_str(9).to_string(),
        time: isa.element_str(10).to_string(),
        version: isa.element_str(12).to_string(),
        control_number: isa.element_str(13).to_string(),
        usage_indicator: isa.element_str(15).to_string(),
        groups: Vec::new(),
    };

    let mut index = 1;
    let mut saw_iea = false;
    while index < segments.len() {
        let segment = &segments[index];
        match segment.id() {
            "GS" if !saw_iea => {
                let (group, next) = parse_group(&segments, index)?;
                envelope.groups.push(group);
                index = next;
            }
            "IEA" if !saw_iea => {
                let declared = parse_count(segment, "IEA", 1)?;
                if declared != envelope.groups.len() {
                    return Err(ParseError::CountMismatch {
                        level: "interchange",
                        declared,
                        actual: envelope.groups.len(),
                    });
                }
                let trailer = segment.element_str(2).trim();
                if trailer != envelope.control_number.trim() {
                    return Err(ParseError::ControlNumberMismatch {
                        level: "interchange",
                        header: envelope.control_number.clone(),
                        trailer: trailer.to_string(),
                    });
                }
                saw_iea = true;
                index += 1;
            }
            other => {
                return Err(ParseError::UnexpectedSegment {
                    id: other.to_string(),
                    position: index,
                });
            }
        }
    }
    if !saw_iea {
        return Err(ParseError::MissingSegment { id: "IEA" });
    }
    Ok(envelope)
}

fn parse_group(
    segments: &[Segment],
    start: usize,
) -> Result<(FunctionalGroup, usize), ParseError> {
    let gs = &segments[start];
    let mut group = FunctionalGroup {
        functional_id: gs.element_str(1).to_string(),
        sender_code: gs.element_str(2).to_string(),
        receiver_code: gs.element_str(3).to_string(),
        date: gs.element_str(4).to_string(),
        time: gs.element_str(5).to_string(),
        control_number: gs.element_str(6).to_string(),
        version: gs.element_str(8).to_string(),
        transactions: Vec::new(),
    };

    let mut index = start + 1;
    while index < segments.len() {
        match segments[index].id() {
            "ST" => {
                let (txn, next) = parse_transaction(segments, index)?;
                group.transactions.push(txn);
                index = next;
            }
            "GE" => {
                let ge = &segments[index];
                let declared = parse_count(ge, "GE", 1)?;
                if declared != group.transactions.len() {
                    return Err(ParseError::CountMismatch {
                        level: "group",
                        declared,
                        actual: group.transactions.len(),
                    });
                }
                if ge.element_str(2) != group.control_number {
                    return Err(ParseError::ControlNumberMismatch {
                        level: "group",
                        header: group.control_number,
                        trailer: ge.element_str(2).to_string(),
                    });
                }
                return Ok((group, index + 1));
            }
            other => {
                return Err(ParseError::UnexpectedSegment {
                    id: other.to_string(),
                    position: index,
                });
            }
        }
    }
    Err(ParseError::MissingSegment { id: "GE" })
}

fn parse_transaction(
    segments: &[Segment],
    start: usize,
) -> Result<(Transaction, usize), ParseError> {
    let st = &segments[start];
    let code = st.element_str(1).to_string();
    let control_number = st.element_str(2).to_string();
    let convention = st.element_str(3).to_string();
    // An 837 without ST03 is institutional iff it carries SV2 service lines.
    let institutional_hint = code == "837"
        && convention.is_empty()
        && segments[start..]
            .iter()
            .take_while(|s| s.id() != "SE")
            .any(|s| s.id() == "SV2");
    let txn_type = TransactionType::from_st(&code, &convention, institutional_hint)?;
    let mut txn = Transaction::new(txn_type, control_number);

    let mut stack: Vec<(Loop, OpenerKind)> = Vec::new();
    let mut observed = 1; // the ST itself
    let mut index = start + 1;
    while index < segments.len() {
        let segment = segments[index].clone();
        let id = segment.id().to_string();
        observed += 1;
        index += 1;

        if id == "SE" {
            while let Some((done, _)) = stack.pop() {
                attach(done, &mut stack, &mut txn);
            }
            let declared = parse_count(&segment, "SE", 1)?;
            if declared != observed {
                return Err(ParseError::CountMismatch {
                    level: "transaction",
                    declared,
                    actual: observed,
                });
            }
            if segment.element_str(2) != txn.control_number {
                return Err(ParseError::ControlNumberMismatch {
                    level: "transaction",
                    header: txn.control_number,
                    trailer: segment.element_str(2).to_string(),
                });
            }
            return Ok((txn, index));
        }

        if let Some(kind) = opener_kind(&segment) {
            match &kind {
                OpenerKind::Hl { .. } => {
                    let parent = segment.element_str(2).to_string();
                    close_claim_loops(&mut stack, &mut txn);
                    // Pop hierarchical levels until the parent referenced by
                    // HL02 is on top; an empty HL02 starts a fresh top-level
                    // chain.
                    loop {
                        match stack.last() {
                            Some((_, OpenerKind::Hl { id }))
                                if parent.is_empty() || *id != parent =>
                            {
                                if let Some((done, _)) = stack.pop() {
                                    attach(done, &mut stack, &mut txn);
                                }
                            }
                            _ => break,
                        }
                    }
                }
                OpenerKind::Clm | OpenerKind::Clp => {
                    close_claim_loops(&mut stack, &mut txn);
                }
                OpenerKind::Lx => {
                    while matches!(stack.last(), Some((_, OpenerKind::Lx))) {
                        if let Some((done, _)) = stack.pop() {
                            attach(done, &mut stack, &mut txn);
                        }
                    }
                }
            }
            let mut frame = Loop::new(id);
            frame.push_segment(segment);
            stack.push((frame, kind));
            continue;
        }

        match id.as_str() {
            "ISA" | "IEA" | "GS" | "GE" | "ST" => {
                return Err(ParseError::UnexpectedSegment {
                    id,
                    position: index - 1,
                });
            }
            _ => match stack.last_mut() {
                Some((frame, _)) => frame.push_segment(segment),
                None => txn.push_segment(segment),
            },
        }
    }
    Err(ParseError::MissingSegment { id: "SE" })
}

/// Close any open claim-scoped loops (LX, CLM, CLP) without touching the HL
/// chain underneath them.
fn close_claim_loops(stack: &mut Vec<(Loop, OpenerKind)>, txn: &mut Transaction) {
    while matches!(
        stack.last(),
        Some((_, OpenerKind::Lx | OpenerKind::Clm | OpenerKind::Clp))
    ) {
        if let Some((done, _)) = stack.pop() {
            attach(done, stack, txn);
        }
    }
}

fn attach(done: Loop, stack: &mut [(Loop, OpenerKind)], txn: &mut Transaction) {
    match stack.last_mut() {
        Some((parent, _)) => parent.push_loop(done),
        None => txn.push_loop(done),
    }
}

fn parse_count(segment: &Segment, id: &'static str, element: usize) -> Result<usize, ParseError> {
    segment
        .element_str(element)
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidElement {
            segment: id,
            element,
            reason: format!("{:?} is not a count", segment.element_str(element)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransactionType;

    fn isa_line() -> String {
        let isa = "ISA*00*          *00*          *ZZ*SENDER         *ZZ*RECEIVER       *240315*1430*^*00501*000000001*0*P*:~";
        assert_eq!(isa.len(), 106);
        isa.to_string()
    }

    fn minimal_interchange(body: &str, txn_count: usize, segment_count: usize) -> String {
        let isa = "ISA*00*          *00*          *ZZ*SENDER         *ZZ*RECEIVER       *240315*1430*^*00501*000000001*0*P*:~";
        assert_eq!(isa.len(), 106);
        format!(
            "{isa}GS*HB*SENDER*RECEIVER*20240315*1430*1*X*005010X279A1~\
             ST*271*0001*005010X279A1~{body}SE*{segment_count}*0001~\
             GE*{txn_count}*1~IEA*1*000000001~"
        )
    }

    #[test]
    fn test_short_isa_is_parse_error_not_panic() {
        let err = tokenize("ISA*00*short").unwrap_err();
        assert!(matches!(err, ParseError::Truncated(12)));
    }

    #[test]
    fn test_non_isa_prefix_rejected() {
        let text = "XSA".to_string() + &"*".repeat(200);
        assert!(matches!(tokenize(&text), Err(ParseError::MissingIsa)));
    }

    #[test]
    fn test_indistinct_delimiters_rejected() {
        // Element separator and segment terminator both '*'.
        let mut text = isa_line();
        text.replace_range(105..106, "*");
        assert!(matches!(
            tokenize(&text),
            Err(ParseError::IndistinctDelimiters)
        ));
    }

    #[test]
    fn test_minimal_271_tokenizes() {
        let body = "HL*1**20*1~NM1*PR*2*ACME HEALTH*****PI*12345~\
                    HL*2*1*21*1~NM1*1P*2*CLINIC*****XX*1234567893~\
                    HL*3*2*22*0~NM1*IL*1*DOE*JOHN****MI*M123~EB*1*IND*30~";
        // ST + 7 body segments + SE
        let text = minimal_interchange(body, 1, 9);
        let envelope = tokenize(&text).expect("tokenize");
        assert_eq!(envelope.sender_id, "SENDER");
        assert_eq!(envelope.groups.len(), 1);
        let txn = &envelope.groups[0].transactions[0];
        assert_eq!(txn.txn_type, TransactionType::EligibilityResponse271);
        // Three HL loops, nested by parent reference.
        assert_eq!(txn.loops("HL").len(), 1);
        let payer = txn.loops("HL")[0];
        assert_eq!(payer.loops("HL").len(), 1);
        let provider = payer.loops("HL")[0];
        assert_eq!(provider.loops("HL").len(), 1);
        assert!(txn.find_segment("EB").is_some());
    }

    #[test]
    fn test_tokenize_is_idempotent() {
        let body = "HL*1**20*1~NM1*PR*2*ACME*****PI*1~HL*2*1*21*1~EB*1~";
        let text = minimal_interchange(body, 1, 6);
        let first = tokenize(&text).expect("first pass");
        let second = tokenize(&text).expect("second pass");
        assert_eq!(first, second);
    }

    #[test]
    fn test_se_count_mismatch_rejected() {
        let body = "HL*1**20*1~EB*1~";
        // Declared count off by one.
        let text = minimal_interchange(body, 1, 5);
        match tokenize(&text) {
            Err(ParseError::CountMismatch {
                level: "transaction",
                declared: 5,
                actual: 4,
            }) => {}
            other => panic!("expected transaction count mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_interchange_control_mismatch_rejected() {
        let body = "EB*1~";
        let mut text = minimal_interchange(body, 1, 3);
        text = text.replace("IEA*1*000000001", "IEA*1*000000002");
        assert!(matches!(
            tokenize(&text),
            Err(ParseError::ControlNumberMismatch {
                level: "interchange",
                ..
            })
        ));
    }

    #[test]
    fn test_missing_iea_rejected() {
        let body = "EB*1~";
        let mut text = minimal_interchange(body, 1, 3);
        text = text.replace("IEA*1*000000001~", "");
        assert!(matches!(
            tokenize(&text),
            Err(ParseError::MissingSegment { id: "IEA" })
        ));
    }

    #[test]
    fn test_newlines_between_segments_are_skipped() {
        let body = "EB*1~\nEB*6~\r\n";
        let text = minimal_interchange(body, 1, 4);
        let envelope = tokenize(&text).expect("tokenize");
        let txn = &envelope.groups[0].transactions[0];
        assert_eq!(txn.segments().len(), 2);
    }

    #[test]
    fn test_opener_dispatch() {
        assert!(matches!(
            opener_kind(&Segment::new("HL").with("3").with("2")),
            Some(OpenerKind::Hl { id }) if id == "3"
        ));
        assert!(matches!(
            opener_kind(&Segment::new("CLP").with("C1")),
            Some(OpenerKind::Clp)
        ));
        assert!(opener_kind(&Segment::new("NM1")).is_none());
    }
}
