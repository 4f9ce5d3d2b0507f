pub mod claim837;
pub mod config;
pub mod edi_faker;
pub mod eligibility;
pub mod eligibility_service;
pub mod error;
pub mod logging;
pub mod model;
pub mod reader;
pub mod remit835;
pub mod reporter;
pub mod service;
pub mod tokenizer;
pub mod validate;
