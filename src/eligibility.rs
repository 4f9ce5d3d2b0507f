use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EdiError, ValidationError};
use crate::model::{Loop, Segment, Transaction, TransactionType};
use crate::validate::{format_date, parse_amount};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InquiryPayer {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InquiryProvider {
    pub name: String,
    pub npi: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InquirySubscriber {
    pub last_name: String,
    pub first_name: String,
    pub member_id: Option<String>,
    pub dob: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InquiryDependent {
    pub last_name: String,
    pub first_name: String,
    pub dob: Option<NaiveDate>,
    /// Individual relationship code (01 spouse, 19 child).
    pub relationship_code: String,
}

/// Everything needed to pose one eligibility question to a payer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityInquiry {
    pub payer: InquiryPayer,
    pub provider: InquiryProvider,
    pub subscriber: InquirySubscriber,
    pub dependent: Option<InquiryDependent>,
    /// EQ01 service type codes; empty means 30 (health benefit plan coverage).
    pub service_type_codes: Vec<String>,
}

impl EligibilityInquiry {
    /// A payer can only find the member with a member id, or failing that a
    /// full name plus date of birth.
    fn identifies_subscriber(&self) -> bool {
        if self
            .subscriber
            .member_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
        {
            return true;
        }
        !self.subscriber.last_name.is_empty()
            && !self.subscriber.first_name.is_empty()
            && self.subscriber.dob.is_some()
    }
}

/// Build a 270 inquiry transaction. The information source / receiver /
/// subscriber HL chain is emitted in order with parent references wired up,
/// so the output re-parses into the same three (or four) nested loops.
pub fn generate_270(
    inquiry: &EligibilityInquiry,
    control_number: u32,
    trace_number: &str,
) -> Result<Transaction, EdiError> {
    if !inquiry.identifies_subscriber() {
        return Err(ValidationError::MissingIdentification.into());
    }

    let mut txn = Transaction::new(
        TransactionType::EligibilityInquiry270,
        format!("{control_number:04}"),
    );
    txn.push_segment(
        Segment::new("BHT")
            .with("0022")
            .with("13")
            .with(trace_number)
            .with("")
            .with(""),
    );

    // HL 1: information source (payer).
    let mut source = Loop::new("HL");
    source.push_segment(Segment::new("HL").with("1").with("").with("20").with("1"));
    source.push_segment(
        Segment::new("NM1")
            .with("PR")
            .with("2")
            .with(inquiry.payer.name.clone())
            .with("")
            .with("")
            .with("")
            .with("")
            .with("PI")
            .with(inquiry.payer.id.clone()),
    );

    // HL 2: information receiver (provider).
    let mut receiver = Loop::new("HL");
    receiver.push_segment(Segment::new("HL").with("2").with("1").with("21").with("1"));
    receiver.push_segment(
        Segment::new("NM1")
            .with("1P")
            .with("2")
            .with(inquiry.provider.name.clone())
            .with("")
            .with("")
            .with("")
            .with("")
            .with("XX")
            .with(inquiry.provider.npi.clone()),
    );

    // HL 3: subscriber. Child indicator depends on a dependent being present.
    let has_dependent = inquiry.dependent.is_some();
    let mut subscriber = Loop::new("HL");
    subscriber.push_segment(
        Segment::new("HL")
            .with("3")
            .with("2")
            .with("22")
            .with(if has_dependent { "1" } else { "0" }),
    );
    subscriber.push_segment(Segment::new("TRN").with("1").with(trace_number).with(format!(
        "1{}",
        inquiry.provider.npi
    )));
    let mut nm1 = Segment::new("NM1")
        .with("IL")
        .with("1")
        .with(inquiry.subscriber.last_name.clone())
        .with(inquiry.subscriber.first_name.clone());
    if let Some(member_id) = &inquiry.subscriber.member_id {
        nm1 = nm1.with("").with("").with("").with("MI").with(member_id.clone());
    }
    subscriber.push_segment(nm1);
    if let Some(dob) = inquiry.subscriber.dob {
        subscriber.push_segment(Segment::new("DMG").with("D8").with(format_date(dob)));
    }
    if !has_dependent {
        push_eq_segments(&mut subscriber, &inquiry.service_type_codes);
    }

    if let Some(dependent) = &inquiry.dependent {
        let mut child = Loop::new("HL");
        child.push_segment(Segment::new("HL").with("4").with("3").with("23").with("0"));
        child.push_segment(
            Segment::new("NM1")
                .with("03")
                .with("1")
                .with(dependent.last_name.clone())
                .with(dependent.first_name.clone()),
        );
        if let Some(dob) = dependent.dob {
            child.push_segment(Segment::new("DMG").with("D8").with(format_date(dob)));
        }
        child.push_segment(
            Segment::new("INS")
                .with("N")
                .with(dependent.relationship_code.clone()),
        );
        push_eq_segments(&mut child, &inquiry.service_type_codes);
        subscriber.push_loop(child);
    }

    receiver.push_loop(subscriber);
    source.push_loop(receiver);
    txn.push_loop(source);
    Ok(txn)
}

fn push_eq_segments(target: &mut Loop, codes: &[String]) {
    if codes.is_empty() {
        target.push_segment(Segment::new("EQ").with("30"));
        return;
    }
    for code in codes {
        target.push_segment(Segment::new("EQ").with(code.clone()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EligibilityStatus {
    Active,
    Inactive,
    /// No EB segment answered the coverage question, or the answer code is
    /// one this engine does not interpret.
    Unknown,
}

/// One benefit line from an EB segment, kept close to the wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenefitInfo {
    /// EB01: 1 active, 6 inactive, A co-insurance, B co-payment, C deductible.
    pub status_code: String,
    /// EB02: IND, FAM.
    pub coverage_level: String,
    /// EB03, repetition-split upstream by the tokenizer.
    pub service_type_codes: Vec<String>,
    /// EB04 insurance type code (MC, HM, PR).
    pub insurance_type: String,
    /// EB05 free-text plan name.
    pub plan_description: String,
    /// EB07 monetary amount (deductible or co-payment).
    pub monetary_amount: Option<Decimal>,
    /// EB08 co-insurance percentage, as a fraction on the wire (.20 = 20%).
    pub percentage: Option<Decimal>,
    /// EB12: Y in network, N out of network, absent unknown.
    pub in_network: Option<bool>,
}

/// What a 271 told us, after interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityResponse {
    pub status: EligibilityStatus,
    pub subscriber_name: String,
    pub payer_name: String,
    pub benefits: Vec<BenefitInfo>,
    /// AAA request-rejection reason codes, in document order.
    pub rejections: Vec<String>,
}

/// Interpret a 271 response. Conservative: coverage is Active only when an
/// EB with status code 1 says so, Inactive on 6 or 7, Unknown otherwise.
/// AAA rejections never abort the walk; they are reported alongside whatever
/// benefit information the payer still sent.
pub fn parse_271(txn: &Transaction) -> Result<EligibilityResponse, EdiError> {
    if txn.txn_type != TransactionType::EligibilityResponse271 {
        return Err(crate::error::ParseError::UnsupportedTransaction(
            txn.txn_type.to_string(),
        )
        .into());
    }

    let mut errors = Vec::new();
    let mut benefits = Vec::new();
    let mut rejections = Vec::new();
    let mut subscriber_name = String::new();
    let mut payer_name = String::new();

    for segment in txn.segments() {
        match segment.id() {
            "NM1" => match segment.element_str(1) {
                "PR" => payer_name = segment.element_str(3).to_string(),
                "IL" => {
                    subscriber_name =
                        format!("{} {}", segment.element_str(4), segment.element_str(3))
                            .trim()
                            .to_string();
                }
                _ => {}
            },
            "AAA" => rejections.push(segment.element_str(3).to_string()),
            "EB" => match parse_eb(segment) {
                Ok(benefit) => benefits.push(benefit),
                Err(err) => errors.push(err),
            },
            _ => {}
        }
    }

    if !errors.is_empty() {
        return Err(EdiError::Validation(errors));
    }

    // Any active-coverage EB wins over inactive ones, regardless of order.
    let status = if benefits.iter().any(|b| b.status_code == "1") {
        EligibilityStatus::Active
    } else if benefits
        .iter()
        .any(|b| matches!(b.status_code.as_str(), "6" | "7"))
    {
        EligibilityStatus::Inactive
    } else {
        EligibilityStatus::Unknown
    };

    Ok(EligibilityResponse {
        status,
        subscriber_name,
        payer_name,
        benefits,
        rejections,
    })
}

fn parse_eb(segment: &Segment) -> Result<BenefitInfo, ValidationError> {
    let monetary_amount = match segment.element_str(7) {
        "" => None,
        raw => Some(parse_amount(raw)?),
    };
    let percentage = match segment.element_str(8) {
        "" => None,
        raw => Some(parse_amount(raw)?),
    };
    let service_type_codes = segment
        .element(3)
        .map(|e| {
            e.components
                .iter()
                .filter(|c| !c.is_empty())
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    Ok(BenefitInfo {
        status_code: segment.element_str(1).to_string(),
        coverage_level: segment.element_str(2).to_string(),
        service_type_codes,
        insurance_type: segment.element_str(4).to_string(),
        plan_description: segment.element_str(5).to_string(),
        monetary_amount,
        percentage,
        in_network: match segment.element_str(12) {
            "Y" => Some(true),
            "N" => Some(false),
            _ => None,
        },
    })
}

#[cfg(test)]
pub fn mock_inquiry() -> EligibilityInquiry {
    EligibilityInquiry {
        payer: InquiryPayer {
            name: "ACME HEALTH".to_string(),
            id: "66666".to_string(),
        },
        provider: InquiryProvider {
            name: "GOOD HEALTH CLINIC".to_string(),
            npi: "1234567893".to_string(),
        },
        subscriber: InquirySubscriber {
            last_name: "DOE".to_string(),
            first_name: "JANE".to_string(),
            member_id: Some("MEM001".to_string()),
            dob: None,
        },
        dependent: None,
        service_type_codes: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_271(eb_segments: Vec<Segment>, rejection: Option<&str>) -> Transaction {
        let mut txn = Transaction::new(TransactionType::EligibilityResponse271, "0001");
        txn.push_segment(Segment::new("BHT").with("0022").with("11").with("T1"));
        let mut source = Loop::new("HL");
        source.push_segment(Segment::new("HL").with("1").with("").with("20").with("1"));
        source.push_segment(
            Segment::new("NM1")
                .with("PR")
                .with("2")
                .with("ACME HEALTH")
                .with("")
                .with("")
                .with("")
                .with("")
                .with("PI")
                .with("66666"),
        );
        let mut subscriber = Loop::new("HL");
        subscriber.push_segment(Segment::new("HL").with("2").with("1").with("22").with("0"));
        subscriber.push_segment(
            Segment::new("NM1")
                .with("IL")
                .with("1")
                .with("DOE")
                .with("JANE"),
        );
        if let Some(code) = rejection {
            subscriber.push_segment(Segment::new("AAA").with("Y").with("").with(code));
        }
        for eb in eb_segments {
            subscriber.push_segment(eb);
        }
        source.push_loop(subscriber);
        txn.push_loop(source);
        txn
    }

    #[test]
    fn test_generate_270_hl_chain_and_defaults() {
        let txn = generate_270(&mock_inquiry(), 42, "TRACE42").expect("valid inquiry");
        assert_eq!(txn.control_number, "0042");
        let hl: Vec<&str> = txn
            .segments()
            .iter()
            .filter(|s| s.id() == "HL")
            .map(|s| s.element_str(3))
            .collect();
        assert_eq!(hl, vec!["20", "21", "22"]);
        // Service type defaults to plan coverage.
        let eq = txn.find_segment("EQ").expect("EQ");
        assert_eq!(eq.element_str(1), "30");
        let nm1 = txn
            .segments()
            .into_iter()
            .find(|s| s.id() == "NM1" && s.element_str(1) == "IL")
            .expect("subscriber NM1");
        assert_eq!(nm1.element_str(8), "MI");
        assert_eq!(nm1.element_str(9), "MEM001");
    }

    #[test]
    fn test_generate_270_dependent_gets_own_hl() {
        let mut inquiry = mock_inquiry();
        inquiry.dependent = Some(InquiryDependent {
            last_name: "DOE".to_string(),
            first_name: "JIMMY".to_string(),
            dob: NaiveDate::from_ymd_opt(2015, 6, 1),
            relationship_code: "19".to_string(),
        });
        let txn = generate_270(&inquiry, 1, "T").expect("valid inquiry");
        let hl: Vec<&str> = txn
            .segments()
            .iter()
            .filter(|s| s.id() == "HL")
            .map(|s| s.element_str(3))
            .collect();
        assert_eq!(hl, vec!["20", "21", "22", "23"]);
        // Subscriber HL flags a child, dependent HL points back at it.
        let subscriber_hl = txn
            .segments()
            .into_iter()
            .find(|s| s.id() == "HL" && s.element_str(3) == "22")
            .expect("subscriber HL")
            .clone();
        assert_eq!(subscriber_hl.element_str(4), "1");
        let dependent_hl = txn
            .segments()
            .into_iter()
            .find(|s| s.id() == "HL" && s.element_str(3) == "23")
            .expect("dependent HL")
            .clone();
        assert_eq!(dependent_hl.element_str(2), subscriber_hl.element_str(1));
    }

    #[test]
    fn test_generate_270_requires_identification() {
        let mut inquiry = mock_inquiry();
        inquiry.subscriber.member_id = None;
        inquiry.subscriber.dob = None;
        match generate_270(&inquiry, 1, "T") {
            Err(EdiError::Validation(errors)) => {
                assert_eq!(errors, vec![ValidationError::MissingIdentification]);
            }
            other => panic!("expected missing identification, got {other:?}"),
        }
        // Name plus date of birth is an acceptable substitute for a member id.
        inquiry.subscriber.dob = NaiveDate::from_ymd_opt(1980, 1, 2);
        assert!(generate_270(&inquiry, 1, "T").is_ok());
    }

    #[test]
    fn test_parse_271_active_with_benefits() {
        let txn = mock_271(
            vec![
                Segment::new("EB")
                    .with("1")
                    .with("IND")
                    .with("30")
                    .with("MC")
                    .with("GOLD PLAN"),
                Segment::new("EB")
                    .with("C")
                    .with("IND")
                    .with("30")
                    .with("MC")
                    .with("")
                    .with("")
                    .with("500"),
            ],
            None,
        );
        let response = parse_271(&txn).expect("valid 271");
        assert_eq!(response.status, EligibilityStatus::Active);
        assert_eq!(response.subscriber_name, "JANE DOE");
        assert_eq!(response.payer_name, "ACME HEALTH");
        assert_eq!(response.benefits.len(), 2);
        assert_eq!(response.benefits[1].monetary_amount, Some(Decimal::new(500, 0)));
        assert!(response.rejections.is_empty());
    }

    #[test]
    fn test_parse_271_inactive_and_unknown() {
        let inactive = mock_271(vec![Segment::new("EB").with("6")], None);
        assert_eq!(
            parse_271(&inactive).expect("valid").status,
            EligibilityStatus::Inactive
        );
        // A response with only ancillary benefit rows answers nothing about
        // coverage.
        let ancillary = mock_271(vec![Segment::new("EB").with("B")], None);
        assert_eq!(
            parse_271(&ancillary).expect("valid").status,
            EligibilityStatus::Unknown
        );
        let silent = mock_271(Vec::new(), None);
        assert_eq!(
            parse_271(&silent).expect("valid").status,
            EligibilityStatus::Unknown
        );
    }

    #[test]
    fn test_parse_271_active_wins_over_earlier_inactive() {
        // Plan-level inactive row first, active coverage row after it.
        let txn = mock_271(
            vec![
                Segment::new("EB").with("6").with("IND").with("88"),
                Segment::new("EB").with("1").with("IND").with("30"),
            ],
            None,
        );
        assert_eq!(
            parse_271(&txn).expect("valid").status,
            EligibilityStatus::Active
        );
    }

    #[test]
    fn test_parse_271_surfaces_rejections() {
        let txn = mock_271(Vec::new(), Some("75"));
        let response = parse_271(&txn).expect("valid");
        assert_eq!(response.status, EligibilityStatus::Unknown);
        assert_eq!(response.rejections, vec!["75".to_string()]);
    }

    #[test]
    fn test_parse_271_rejects_bad_amount() {
        let txn = mock_271(
            vec![Segment::new("EB")
                .with("C")
                .with("")
                .with("")
                .with("")
                .with("")
                .with("")
                .with("FIVE HUNDRED")],
            None,
        );
        match parse_271(&txn) {
            Err(EdiError::Validation(errors)) => {
                assert!(matches!(errors[0], ValidationError::InvalidAmount(_)));
            }
            other => panic!("expected invalid amount, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_271_wrong_type() {
        let txn = Transaction::new(TransactionType::Remittance835, "1");
        assert!(parse_271(&txn).is_err());
    }
}
