use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EdiError, ParseError, ValidationError};
use crate::model::{Loop, Node, Transaction, TransactionType};
use crate::validate;

/// Diagnosis code system, preserved from the HI qualifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeSystem {
    Icd10Cm,
    Icd9Cm,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Organization name or last name (NM103).
    pub name: String,
    pub first_name: Option<String>,
    pub npi: String,
    pub address: Option<AddressInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberInfo {
    pub last_name: String,
    pub first_name: String,
    pub member_id: Option<String>,
    pub dob: Option<NaiveDate>,
    pub gender: Option<String>,
    pub payer_name: Option<String>,
    pub address: Option<AddressInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub last_name: String,
    pub first_name: String,
    pub dob: Option<NaiveDate>,
    pub gender: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisInfo {
    pub code: String,
    pub code_system: CodeSystem,
    /// 1-based position in the claim's diagnosis sequence; 1 is principal.
    pub sequence: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLine837 {
    pub line_number: usize,
    pub procedure_code: String,
    pub modifiers: Vec<String>,
    pub charge_amount: Decimal,
    pub units: Decimal,
    pub service_date: Option<NaiveDate>,
    /// 1-based indices into the claim's diagnosis sequence.
    pub diagnosis_pointers: Vec<usize>,
    /// Institutional lines only (SV201).
    pub revenue_code: Option<String>,
}

/// Normalized claim produced by one parse call. Immutable thereafter and
/// owned by the caller; holds no references into the raw source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedClaim837 {
    pub claim_id: String,
    pub txn_type: TransactionType,
    pub total_charge: Decimal,
    pub place_of_service: Option<String>,
    pub provider: ProviderInfo,
    pub subscriber: SubscriberInfo,
    pub patient: Option<PatientInfo>,
    pub diagnoses: Vec<DiagnosisInfo>,
    pub service_lines: Vec<ServiceLine837>,
}

/// Parse an 837P or 837I transaction tree into a normalized claim.
///
/// Validation errors are accumulated across the whole walk so the caller
/// sees the complete defect list in one pass; any error rejects the claim.
pub fn parse_837(txn: &Transaction) -> Result<ParsedClaim837, EdiError> {
    if !matches!(
        txn.txn_type,
        TransactionType::Claim837P | TransactionType::Claim837I
    ) {
        return Err(
            ParseError::UnsupportedTransaction(txn.txn_type.to_string()).into(),
        );
    }

    let mut errors = Vec::new();
    let mut hl_loops = Vec::new();
    collect_hl_loops(&txn.nodes, &mut hl_loops);

    let mut provider = None;
    let mut subscriber = None;
    let mut patient = None;
    let mut claim_loop: Option<&Loop> = None;
    let mut saw_provider_loop = false;
    let mut saw_subscriber_loop = false;

    for hl in &hl_loops {
        let Some(hl_seg) = hl.segment("HL") else {
            continue;
        };
        match hl_seg.element_str(3) {
            "20" => {
                saw_provider_loop = true;
                provider = parse_provider(hl, &mut errors);
            }
            "22" => {
                saw_subscriber_loop = true;
                subscriber = parse_subscriber(hl, &mut errors);
                if claim_loop.is_none() {
                    claim_loop = hl.loops("CLM").first().copied();
                }
            }
            "23" => {
                patient = parse_patient(hl);
                // A claim under the patient level supersedes one found at
                // the subscriber level.
                if let Some(found) = hl.loops("CLM").first() {
                    claim_loop = Some(found);
                }
            }
            _ => {}
        }
    }

    if !saw_provider_loop {
        errors.push(ValidationError::MissingSegment {
            segment: "HL",
            context: "billing provider hierarchy",
        });
    }
    if !saw_subscriber_loop {
        errors.push(ValidationError::MissingSegment {
            segment: "HL",
            context: "subscriber hierarchy",
        });
    }

    let claim = match claim_loop {
        Some(found) => parse_claim(found, txn.txn_type, &mut errors),
        None => {
            errors.push(ValidationError::MissingSegment {
                segment: "CLM",
                context: "claim",
            });
            None
        }
    };

    match (provider, subscriber, claim) {
        (Some(provider), Some(subscriber), Some(claim)) if errors.is_empty() => {
            Ok(ParsedClaim837 {
                claim_id: claim.claim_id,
                txn_type: txn.txn_type,
                total_charge: claim.total_charge,
                place_of_service: claim.place_of_service,
                provider,
                subscriber,
                patient,
                diagnoses: claim.diagnoses,
                service_lines: claim.service_lines,
            })
        }
        _ => Err(EdiError::Validation(errors)),
    }
}

fn collect_hl_loops<'a>(nodes: &'a [Node], out: &mut Vec<&'a Loop>) {
    for node in nodes {
        if let Node::Loop(l) = node {
            if l.id == "HL" {
                out.push(l);
            }
            collect_hl_loops(&l.nodes, out);
        }
    }
}

fn parse_address(hl: &Loop) -> Option<AddressInfo> {
    let n3 = hl.segment("N3")?;
    let n4 = hl.segment("N4")?;
    Some(AddressInfo {
        line1: n3.element_str(1).to_string(),
        line2: non_empty(n3.element_str(2)),
        city: n4.element_str(1).to_string(),
        state: n4.element_str(2).to_string(),
        zip: n4.element_str(3).to_string(),
    })
}

fn parse_provider(hl: &Loop, errors: &mut Vec<ValidationError>) -> Option<ProviderInfo> {
    let Some(nm1) = hl
        .segments()
        .into_iter()
        .find(|s| s.id() == "NM1" && s.element_str(1) == "85")
    else {
        errors.push(ValidationError::MissingSegment {
            segment: "NM1",
            context: "billing provider loop",
        });
        return None;
    };
    let npi = if nm1.element_str(8) == "XX" {
        nm1.element_str(9).to_string()
    } else {
        String::new()
    };
    if npi.is_empty() {
        errors.push(ValidationError::MissingElement {
            segment: "NM1",
            element: 9,
        });
        return None;
    }
    if !validate::npi_is_valid(&npi) {
        errors.push(ValidationError::InvalidNpi(npi.clone()));
    }
    Some(ProviderInfo {
        name: nm1.element_str(3).to_string(),
        first_name: non_empty(nm1.element_str(4)),
        npi,
        address: parse_address(hl),
    })
}

fn parse_subscriber(hl: &Loop, errors: &mut Vec<ValidationError>) -> Option<SubscriberInfo> {
    let Some(nm1) = hl
        .segments()
        .into_iter()
        .find(|s| s.id() == "NM1" && s.element_str(1) == "IL")
    else {
        errors.push(ValidationError::MissingSegment {
            segment: "NM1",
            context: "subscriber loop",
        });
        return None;
    };
    let member_id = if nm1.element_str(8) == "MI" {
        non_empty(nm1.element_str(9))
    } else {
        None
    };
    let mut dob = None;
    let mut gender = None;
    if let Some(dmg) = hl.segment("DMG") {
        match validate::parse_date(dmg.element_str(2)) {
            Ok(date) => dob = Some(date),
            Err(err) => errors.push(err),
        }
        gender = non_empty(dmg.element_str(3));
    }
    let payer_name = hl
        .segments()
        .into_iter()
        .find(|s| s.id() == "NM1" && s.element_str(1) == "PR")
        .map(|s| s.element_str(3).to_string());
    Some(SubscriberInfo {
        last_name: nm1.element_str(3).to_string(),
        first_name: nm1.element_str(4).to_string(),
        member_id,
        dob,
        gender,
        payer_name,
        address: parse_address(hl),
    })
}

fn parse_patient(hl: &Loop) -> Option<PatientInfo> {
    let nm1 = hl
        .segments()
        .into_iter()
        .find(|s| s.id() == "NM1" && s.element_str(1) == "QC")?;
    let (dob, gender) = match hl.segment("DMG") {
        Some(dmg) => (
            validate::parse_date(dmg.element_str(2)).ok(),
            non_empty(dmg.element_str(3)),
        ),
        None => (None, None),
    };
    Some(PatientInfo {
        last_name: nm1.element_str(3).to_string(),
        first_name: nm1.element_str(4).to_string(),
        dob,
        gender,
    })
}

struct ClaimFields {
    claim_id: String,
    total_charge: Decimal,
    place_of_service: Option<String>,
    diagnoses: Vec<DiagnosisInfo>,
    service_lines: Vec<ServiceLine837>,
}

fn parse_claim(
    claim_loop: &Loop,
    txn_type: TransactionType,
    errors: &mut Vec<ValidationError>,
) -> Option<ClaimFields> {
    let clm = claim_loop.segment("CLM")?;
    let claim_id = clm.element_str(1).to_string();
    if claim_id.is_empty() {
        errors.push(ValidationError::MissingElement {
            segment: "CLM",
            element: 1,
        });
    }
    let total_charge = match validate::parse_amount(clm.element_str(2)) {
        Ok(amount) => amount,
        Err(err) => {
            errors.push(err);
            Decimal::ZERO
        }
    };
    let place_of_service = non_empty(clm.component_str(5, 0));

    let diagnoses = parse_diagnoses(claim_loop);
    let service_lines = parse_service_lines(claim_loop, txn_type, errors);

    // 1-based pointers per the X12 convention; out of range is a reject,
    // never a silently dropped line.
    for line in &service_lines {
        for &pointer in &line.diagnosis_pointers {
            if pointer == 0 || pointer > diagnoses.len() {
                errors.push(ValidationError::DiagnosisPointerOutOfRange {
                    line: line.line_number,
                    pointer,
                    count: diagnoses.len(),
                });
            }
        }
    }

    Some(ClaimFields {
        claim_id,
        total_charge,
        place_of_service,
        diagnoses,
        service_lines,
    })
}

fn parse_diagnoses(claim_loop: &Loop) -> Vec<DiagnosisInfo> {
    let mut diagnoses = Vec::new();
    for hi in claim_loop.nodes.iter().filter_map(|n| match n {
        Node::Segment(s) if s.id() == "HI" => Some(s),
        _ => None,
    }) {
        for element in hi.elements.iter().skip(1) {
            let code = element.component(1);
            if code.is_empty() {
                continue;
            }
            let code_system = match element.component(0) {
                "ABK" | "ABF" => CodeSystem::Icd10Cm,
                "BK" | "BF" => CodeSystem::Icd9Cm,
                _ => CodeSystem::Other,
            };
            diagnoses.push(DiagnosisInfo {
                code: code.to_string(),
                code_system,
                sequence: diagnoses.len() + 1,
            });
        }
    }
    diagnoses
}

fn parse_service_lines(
    claim_loop: &Loop,
    txn_type: TransactionType,
    errors: &mut Vec<ValidationError>,
) -> Vec<ServiceLine837> {
    let mut lines = Vec::new();
    for (index, lx) in claim_loop.loops("LX").into_iter().enumerate() {
        let line_number = lx
            .segment("LX")
            .and_then(|s| s.element_str(1).parse().ok())
            .unwrap_or(index + 1);
        let line = match txn_type {
            TransactionType::Claim837I => parse_institutional_line(lx, line_number, errors),
            _ => parse_professional_line(lx, line_number, errors),
        };
        if let Some(line) = line {
            lines.push(line);
        }
    }
    lines
}

fn parse_professional_line(
    lx: &Loop,
    line_number: usize,
    errors: &mut Vec<ValidationError>,
) -> Option<ServiceLine837> {
    let Some(sv1) = lx.segment("SV1") else {
        errors.push(ValidationError::MissingSegment {
            segment: "SV1",
            context: "professional service line loop",
        });
        return None;
    };
    let procedure = sv1.element(1)?;
    let procedure_code = procedure.component(1).to_string();
    let modifiers: Vec<String> = procedure
        .components
        .iter()
        .skip(2)
        .filter(|m| !m.is_empty())
        .cloned()
        .collect();
    let charge_amount = match validate::parse_amount(sv1.element_str(2)) {
        Ok(amount) => amount,
        Err(err) => {
            errors.push(err);
            Decimal::ZERO
        }
    };
    let units = parse_units(sv1.element_str(4), errors);
    let diagnosis_pointers = parse_pointers(sv1.element(7), line_number, errors);
    let service_date = parse_service_date(lx, errors);
    Some(ServiceLine837 {
        line_number,
        procedure_code,
        modifiers,
        charge_amount,
        units,
        service_date,
        diagnosis_pointers,
        revenue_code: None,
    })
}

fn parse_institutional_line(
    lx: &Loop,
    line_number: usize,
    errors: &mut Vec<ValidationError>,
) -> Option<ServiceLine837> {
    let Some(sv2) = lx.segment("SV2") else {
        errors.push(ValidationError::MissingSegment {
            segment: "SV2",
            context: "institutional service line loop",
        });
        return None;
    };
    let revenue_code = non_empty(sv2.element_str(1));
    let procedure_code = sv2.component_str(2, 1).to_string();
    let modifiers: Vec<String> = sv2
        .element(2)
        .map(|e| {
            e.components
                .iter()
                .skip(2)
                .filter(|m| !m.is_empty())
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    let charge_amount = match validate::parse_amount(sv2.element_str(3)) {
        Ok(amount) => amount,
        Err(err) => {
            errors.push(err);
            Decimal::ZERO
        }
    };
    let units = parse_units(sv2.element_str(5), errors);
    let service_date = parse_service_date(lx, errors);
    Some(ServiceLine837 {
        line_number,
        procedure_code,
        modifiers,
        charge_amount,
        units,
        service_date,
        diagnosis_pointers: Vec::new(),
        revenue_code,
    })
}

fn parse_units(value: &str, errors: &mut Vec<ValidationError>) -> Decimal {
    if value.is_empty() {
        return Decimal::ONE;
    }
    match validate::parse_amount(value) {
        Ok(units) => units,
        Err(err) => {
            errors.push(err);
            Decimal::ONE
        }
    }
}

fn parse_pointers(
    element: Option<&crate::model::Element>,
    line_number: usize,
    errors: &mut Vec<ValidationError>,
) -> Vec<usize> {
    let Some(element) = element else {
        return Vec::new();
    };
    let mut pointers = Vec::new();
    for component in element.components.iter().filter(|c| !c.is_empty()) {
        match component.parse::<usize>() {
            Ok(pointer) => pointers.push(pointer),
            Err(_) => errors.push(ValidationError::MalformedDiagnosisPointer {
                line: line_number,
                value: component.clone(),
            }),
        }
    }
    pointers
}

fn parse_service_date(lx: &Loop, errors: &mut Vec<ValidationError>) -> Option<NaiveDate> {
    let dtp = lx
        .segments()
        .into_iter()
        .find(|s| s.id() == "DTP" && s.element_str(1) == "472")?;
    match validate::parse_date(dtp.element_str(3)) {
        Ok(date) => Some(date),
        Err(err) => {
            errors.push(err);
            None
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edi_faker;
    use crate::tokenizer::tokenize;

    fn parse_text(text: &str) -> Result<ParsedClaim837, EdiError> {
        let envelope = tokenize(text).expect("tokenize");
        let txn = envelope
            .transactions()
            .next()
            .expect("one transaction");
        parse_837(txn)
    }

    #[test]
    fn test_parse_minimal_professional_claim() {
        let text = edi_faker::sample_837p_text();
        let claim = parse_text(&text).expect("valid claim");
        assert_eq!(claim.txn_type, TransactionType::Claim837P);
        assert_eq!(claim.claim_id, "CLM001");
        assert_eq!(claim.provider.npi, "1234567893");
        assert_eq!(claim.subscriber.last_name, "DOE");
        assert_eq!(claim.diagnoses.len(), 1);
        assert_eq!(claim.diagnoses[0].code, "250.00");
        assert_eq!(claim.diagnoses[0].code_system, CodeSystem::Icd9Cm);
        assert_eq!(claim.service_lines.len(), 1);
        let line = &claim.service_lines[0];
        assert_eq!(line.diagnosis_pointers, vec![1]);
        assert_eq!(line.charge_amount, Decimal::new(12550, 2));
    }

    #[test]
    fn test_out_of_range_pointer_is_rejected() {
        let text = edi_faker::sample_837p_text().replace("SV1*HC:99213*125.50*UN*1***1~", "SV1*HC:99213*125.50*UN*1***2~");
        match parse_text(&text) {
            Err(EdiError::Validation(errors)) => {
                assert!(errors.iter().any(|e| matches!(
                    e,
                    ValidationError::DiagnosisPointerOutOfRange {
                        pointer: 2,
                        count: 1,
                        ..
                    }
                )));
            }
            other => panic!("expected validation reject, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_npi_is_rejected() {
        let text = edi_faker::sample_837p_text().replace("1234567893", "1234567890");
        match parse_text(&text) {
            Err(EdiError::Validation(errors)) => {
                assert!(errors
                    .iter()
                    .any(|e| matches!(e, ValidationError::InvalidNpi(_))));
            }
            other => panic!("expected validation reject, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_provider_collects_with_other_errors() {
        // Drop the billing provider NM1 and corrupt the charge amount: the
        // reject must carry both defects, not stop at the first.
        let text = edi_faker::sample_837p_text()
            .replace("NM1*85*2*GOOD HEALTH CLINIC*****XX*1234567893~", "REF*EI*123456789~")
            .replace("SV1*HC:99213*125.50*UN*1***1~", "SV1*HC:99213*bad*UN*1***1~");
        match parse_text(&text) {
            Err(EdiError::Validation(errors)) => {
                assert!(errors.len() >= 2, "expected both defects, got {errors:?}");
                assert!(errors.iter().any(|e| matches!(
                    e,
                    ValidationError::MissingSegment {
                        segment: "NM1",
                        ..
                    }
                )));
                assert!(errors
                    .iter()
                    .any(|e| matches!(e, ValidationError::InvalidAmount(_))));
            }
            other => panic!("expected validation reject, got {other:?}"),
        }
    }
}
