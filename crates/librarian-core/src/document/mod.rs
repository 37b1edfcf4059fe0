//! PDF validity checking and the repair cascade.

pub mod inspect;
pub mod repair;
pub mod sandbox;
pub mod text;
pub mod validator;

pub use inspect::{is_pdf_candidate, PdfDetails};
pub use repair::{build_strategies, ExternalTool, LopdfResave, RepairStrategy};
pub use sandbox::Isolation;
pub use text::{TextReply, TextSampler};
pub use validator::{
    AcceptedRepair, DocumentCheck, DocumentOutcome, DocumentValidator, LopdfCheck, ProbeReply,
    ValidationState,
};
