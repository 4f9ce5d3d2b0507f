use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EdiError, ValidationError};
use crate::model::{Loop, Segment, Transaction, TransactionType};
use crate::validate::{format_amount, format_date};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerInfo {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayeeInfo {
    pub name: String,
    pub npi: String,
    pub tax_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
    pub last_name: String,
    pub first_name: String,
}

/// One CAS entry. Amounts are signed: claim-level additions (interest) are
/// positive, recoupments negative; service-level reductions are positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentReason {
    /// CO, PR, OA, PI
    pub group_code: String,
    pub reason_code: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePayment {
    pub procedure_code: String,
    pub charged: Decimal,
    pub paid: Decimal,
    pub units: u32,
    /// Per-line reductions, emitted as CAS segments after the SVC.
    pub adjustments: Vec<AdjustmentReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPayment {
    pub claim_id: String,
    /// CLP02: 1 processed as primary, 4 denied.
    pub status_code: String,
    pub charged: Decimal,
    pub paid: Decimal,
    pub patient_responsibility: Decimal,
    pub payer_control_number: Option<String>,
    pub patient: Option<PersonName>,
    pub services: Vec<ServicePayment>,
    /// Claim-level entries (interest, recoupment), signed.
    pub adjustments: Vec<AdjustmentReason>,
}

impl ClaimPayment {
    /// Service-level paid amounts plus claim-level adjustments must equal
    /// the claim-level paid amount, to the cent.
    pub fn reconciles(&self) -> bool {
        let services: Decimal = self.services.iter().map(|s| s.paid).sum();
        let adjustments: Decimal = self.adjustments.iter().map(|a| a.amount).sum();
        services + adjustments == self.paid
    }
}

/// Generator input: one remittance advice document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemittanceAdvice {
    pub payer: PayerInfo,
    pub payee: PayeeInfo,
    pub trace_number: String,
    /// BPR04: ACH, CHK, NON
    pub payment_method: String,
    pub payment_date: NaiveDate,
    pub claims: Vec<ClaimPayment>,
}

impl RemittanceAdvice {
    pub fn total_paid(&self) -> Decimal {
        self.claims.iter().map(|c| c.paid).sum()
    }
}

/// Build an 835 transaction tree from a remittance advice. Deterministic and
/// side-effect free: the caller supplies the transaction control number, and
/// claims/services/adjustments are emitted in the order provided.
///
/// Non-reconciling claim payments are rejected with the full defect list,
/// never silently corrected.
pub fn generate_835(
    remittance: &RemittanceAdvice,
    control_number: u32,
) -> Result<Transaction, EdiError> {
    let mut errors = Vec::new();
    for claim in &remittance.claims {
        if !claim.reconciles() {
            let services: Decimal = claim.services.iter().map(|s| s.paid).sum();
            let adjustments: Decimal = claim.adjustments.iter().map(|a| a.amount).sum();
            errors.push(ValidationError::AmountMismatch {
                claim_id: claim.claim_id.clone(),
                services: format_amount(services),
                adjustments: format_amount(adjustments),
                paid: format_amount(claim.paid),
            });
        }
    }
    if !errors.is_empty() {
        return Err(EdiError::Validation(errors));
    }

    let mut txn = Transaction::new(
        TransactionType::Remittance835,
        format!("{control_number:04}"),
    );
    let date = format_date(remittance.payment_date);

    txn.push_segment(
        Segment::new("BPR")
            .with("I")
            .with(format_amount(remittance.total_paid()))
            .with("C")
            .with(remittance.payment_method.clone())
            .with(date.clone()),
    );
    txn.push_segment(
        Segment::new("TRN")
            .with("1")
            .with(remittance.trace_number.clone())
            .with(format!("1{}", remittance.payer.id)),
    );
    txn.push_segment(Segment::new("DTM").with("405").with(date.clone()));
    txn.push_segment(
        Segment::new("N1")
            .with("PR")
            .with(remittance.payer.name.clone())
            .with("PI")
            .with(remittance.payer.id.clone()),
    );
    txn.push_segment(
        Segment::new("N1")
            .with("PE")
            .with(remittance.payee.name.clone())
            .with("XX")
            .with(remittance.payee.npi.clone()),
    );
    if let Some(tax_id) = &remittance.payee.tax_id {
        txn.push_segment(Segment::new("REF").with("TJ").with(tax_id.clone()));
    }

    for claim in &remittance.claims {
        txn.push_loop(claim_payment_loop(claim, &date));
    }
    Ok(txn)
}

fn claim_payment_loop(claim: &ClaimPayment, date: &str) -> Loop {
    let mut body = Loop::new("CLP");
    body.push_segment(
        Segment::new("CLP")
            .with(claim.claim_id.clone())
            .with(claim.status_code.clone())
            .with(format_amount(claim.charged))
            .with(format_amount(claim.paid))
            .with(format_amount(claim.patient_responsibility))
            .with("MC")
            .with(claim.payer_control_number.clone().unwrap_or_default()),
    );
    if let Some(patient) = &claim.patient {
        body.push_segment(
            Segment::new("NM1")
                .with("QC")
                .with("1")
                .with(patient.last_name.clone())
                .with(patient.first_name.clone()),
        );
    }
    for adjustment in &claim.adjustments {
        body.push_segment(cas_segment(adjustment));
    }
    for service in &claim.services {
        body.push_segment(
            Segment::new("SVC")
                .with_composite(&["HC", &service.procedure_code])
                .with(format_amount(service.charged))
                .with(format_amount(service.paid))
                .with("")
                .with(service.units.to_string()),
        );
        body.push_segment(Segment::new("DTM").with("472").with(date));
        for adjustment in &service.adjustments {
            body.push_segment(cas_segment(adjustment));
        }
    }
    body
}

fn cas_segment(adjustment: &AdjustmentReason) -> Segment {
    Segment::new("CAS")
        .with(adjustment.group_code.clone())
        .with(adjustment.reason_code.clone())
        .with(format_amount(adjustment.amount))
}

/// Adjudication outcome for one claim, handed over by the claim-processing
/// collaborator. This is the seam between adjudication logic and EDI
/// generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjudicationDecision {
    Approved,
    PartiallyApproved,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDecision {
    pub procedure_code: String,
    pub charged: Decimal,
    pub paid: Decimal,
    pub patient_responsibility: Decimal,
    /// Claim adjustment reason code for any shortfall; defaults to 45
    /// (charge exceeds fee schedule) when absent.
    pub reason_code: Option<String>,
    pub units: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjudicationResult {
    pub claim_id: String,
    pub decision: AdjudicationDecision,
    pub payer: PayerInfo,
    pub payee: PayeeInfo,
    pub patient: Option<PersonName>,
    pub adjudicated_on: NaiveDate,
    pub services: Vec<ServiceDecision>,
}

/// Map an adjudication result to a remittance advice. Total: every outcome
/// maps to a valid, reconciling document, including zero-pay denials.
pub fn create_remittance_from_adjudication(
    adjudication: &AdjudicationResult,
    trace_number: &str,
) -> RemittanceAdvice {
    let mut services = Vec::new();
    let mut charged = Decimal::ZERO;
    let mut paid = Decimal::ZERO;
    let mut patient_responsibility = Decimal::ZERO;

    for decision in &adjudication.services {
        charged += decision.charged;
        paid += decision.paid;
        patient_responsibility += decision.patient_responsibility;

        let mut adjustments = Vec::new();
        if decision.patient_responsibility > Decimal::ZERO {
            adjustments.push(AdjustmentReason {
                group_code: "PR".to_string(),
                reason_code: "1".to_string(),
                amount: decision.patient_responsibility,
            });
        }
        let shortfall = decision.charged - decision.paid - decision.patient_responsibility;
        if shortfall > Decimal::ZERO {
            adjustments.push(AdjustmentReason {
                group_code: "CO".to_string(),
                reason_code: decision
                    .reason_code
                    .clone()
                    .unwrap_or_else(|| "45".to_string()),
                amount: shortfall,
            });
        }
        services.push(ServicePayment {
            procedure_code: decision.procedure_code.clone(),
            charged: decision.charged,
            paid: decision.paid,
            units: decision.units,
            adjustments,
        });
    }

    let status_code = match adjudication.decision {
        AdjudicationDecision::Approved | AdjudicationDecision::PartiallyApproved => "1",
        AdjudicationDecision::Denied => "4",
    };

    RemittanceAdvice {
        payer: adjudication.payer.clone(),
        payee: adjudication.payee.clone(),
        trace_number: trace_number.to_string(),
        payment_method: if paid > Decimal::ZERO { "ACH" } else { "NON" }.to_string(),
        payment_date: adjudication.adjudicated_on,
        claims: vec![ClaimPayment {
            claim_id: adjudication.claim_id.clone(),
            status_code: status_code.to_string(),
            charged,
            paid,
            patient_responsibility,
            payer_control_number: None,
            patient: adjudication.patient.clone(),
            services,
            adjustments: Vec::new(),
        }],
    }
}

#[cfg(test)]
pub fn mock_remittance() -> RemittanceAdvice {
    RemittanceAdvice {
        payer: PayerInfo {
            name: "ACME HEALTH".to_string(),
            id: "66666".to_string(),
        },
        payee: PayeeInfo {
            name: "GOOD HEALTH CLINIC".to_string(),
            npi: "1234567893".to_string(),
            tax_id: Some("123456789".to_string()),
        },
        trace_number: "TRACE0001".to_string(),
        payment_method: "ACH".to_string(),
        payment_date: NaiveDate::from_ymd_opt(2024, 3, 15).expect("valid date"),
        claims: vec![ClaimPayment {
            claim_id: "CLM001".to_string(),
            status_code: "1".to_string(),
            charged: Decimal::new(12550, 2),
            paid: Decimal::new(10040, 2),
            patient_responsibility: Decimal::new(2510, 2),
            payer_control_number: Some("ICN123".to_string()),
            patient: Some(PersonName {
                last_name: "DOE".to_string(),
                first_name: "JOHN".to_string(),
            }),
            services: vec![ServicePayment {
                procedure_code: "99213".to_string(),
                charged: Decimal::new(12550, 2),
                paid: Decimal::new(10040, 2),
                units: 1,
                adjustments: vec![AdjustmentReason {
                    group_code: "PR".to_string(),
                    reason_code: "1".to_string(),
                    amount: Decimal::new(2510, 2),
                }],
            }],
            adjustments: Vec::new(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_emits_clp_svc_cas_in_order() {
        let txn = generate_835(&mock_remittance(), 7).expect("valid remittance");
        assert_eq!(txn.control_number, "0007");
        let clp_loops = txn.loops("CLP");
        assert_eq!(clp_loops.len(), 1);
        let ids: Vec<&str> = clp_loops[0].segments().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["CLP", "NM1", "SVC", "DTM", "CAS"]);
        let clp = clp_loops[0].segment("CLP").expect("CLP");
        assert_eq!(clp.element_str(3), "125.5");
        assert_eq!(clp.element_str(4), "100.4");
    }

    #[test]
    fn test_non_reconciling_claim_is_rejected() {
        let mut remittance = mock_remittance();
        remittance.claims[0].paid = Decimal::new(9999, 2);
        match generate_835(&remittance, 1) {
            Err(EdiError::Validation(errors)) => {
                assert!(matches!(
                    errors[0],
                    ValidationError::AmountMismatch { .. }
                ));
            }
            other => panic!("expected amount mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_claim_level_adjustment_participates_in_reconciliation() {
        let mut remittance = mock_remittance();
        // Interest paid on top of the service-level amount.
        remittance.claims[0].adjustments.push(AdjustmentReason {
            group_code: "OA".to_string(),
            reason_code: "225".to_string(),
            amount: Decimal::new(150, 2),
        });
        remittance.claims[0].paid += Decimal::new(150, 2);
        assert!(remittance.claims[0].reconciles());
        assert!(generate_835(&remittance, 1).is_ok());
    }

    #[test]
    fn test_zero_pay_denial_maps_to_valid_remittance() {
        let adjudication = AdjudicationResult {
            claim_id: "CLM002".to_string(),
            decision: AdjudicationDecision::Denied,
            payer: mock_remittance().payer,
            payee: mock_remittance().payee,
            patient: None,
            adjudicated_on: NaiveDate::from_ymd_opt(2024, 3, 15).expect("valid date"),
            services: vec![ServiceDecision {
                procedure_code: "99213".to_string(),
                charged: Decimal::new(12550, 2),
                paid: Decimal::ZERO,
                patient_responsibility: Decimal::ZERO,
                reason_code: Some("96".to_string()),
                units: 1,
            }],
        };
        let remittance = create_remittance_from_adjudication(&adjudication, "T1");
        assert_eq!(remittance.payment_method, "NON");
        let claim = &remittance.claims[0];
        assert_eq!(claim.status_code, "4");
        assert_eq!(claim.paid, Decimal::ZERO);
        assert!(claim.reconciles());
        // The full charge is explained by a service-level adjustment.
        assert_eq!(claim.services[0].adjustments[0].reason_code, "96");
        assert_eq!(claim.services[0].adjustments[0].amount, Decimal::new(12550, 2));
        assert!(generate_835(&remittance, 1).is_ok());
    }

    #[test]
    fn test_adjudication_mapping_reconciles_partial_payment() {
        let adjudication = AdjudicationResult {
            claim_id: "CLM003".to_string(),
            decision: AdjudicationDecision::PartiallyApproved,
            payer: mock_remittance().payer,
            payee: mock_remittance().payee,
            patient: None,
            adjudicated_on: NaiveDate::from_ymd_opt(2024, 3, 15).expect("valid date"),
            services: vec![
                ServiceDecision {
                    procedure_code: "99213".to_string(),
                    charged: Decimal::new(10000, 2),
                    paid: Decimal::new(8000, 2),
                    patient_responsibility: Decimal::new(1500, 2),
                    reason_code: None,
                    units: 1,
                },
                ServiceDecision {
                    procedure_code: "85025".to_string(),
                    charged: Decimal::new(4500, 2),
                    paid: Decimal::ZERO,
                    patient_responsibility: Decimal::ZERO,
                    reason_code: Some("50".to_string()),
                    units: 1,
                },
            ],
        };
        let remittance = create_remittance_from_adjudication(&adjudication, "T2");
        let claim = &remittance.claims[0];
        assert_eq!(claim.paid, Decimal::new(8000, 2));
        assert!(claim.reconciles());
        // Shortfall on the first line: 100.00 - 80.00 - 15.00 = 5.00 CO-45.
        assert_eq!(claim.services[0].adjustments[1].amount, Decimal::new(500, 2));
        assert_eq!(claim.services[0].adjustments[1].reason_code, "45");
    }
}
