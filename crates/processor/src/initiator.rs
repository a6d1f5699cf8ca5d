use tracefin_core::model::span::Span;

use crate::deriver::CompletionTimeProcessing;
use crate::task::{OneToMany, Step};

/// Fans stored spans out into derivation work: each root span starts one
/// [`CompletionTimeProcessing`], descendants start none. The in-flight item
/// for their trace sees them on its next snapshot.
pub struct ProcessingInitiator;

impl OneToMany for ProcessingInitiator {
    type State = Span;
    type Out = CompletionTimeProcessing;

    fn process(&self, _tenant: &str, span: Span) -> Step<Span, Vec<CompletionTimeProcessing>> {
        if let Err(e) = span.validate() {
            return Step::Drop(format!("unusable span: {e}"));
        }
        if span.is_root() {
            Step::Output(vec![CompletionTimeProcessing::new(span)])
        } else {
            Step::Output(Vec::new())
        }
    }
}
