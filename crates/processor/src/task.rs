use std::time::Duration;

use tracing::warn;

/// Baseline redelivery delay: one interval of "no new data" is the proxy for
/// trace completeness, so this also bounds how long a quiet trace waits
/// before its completion time is emitted.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5000);

/// Outcome of one processing attempt over a work item. Needing more data is
/// an ordinary return value, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<S, O> {
    /// The transformation finished; hand the output downstream.
    Output(O),
    /// Not ready yet; redeliver the carried state after the stage delay.
    Retry(S),
    /// Unrecoverable input; logged and discarded, never retried.
    Drop(String),
}

/// One-input-to-one-output transformation shape.
pub trait OneToOne: Send + Sync {
    type State: Send;
    type Out: Send;

    fn process(&self, tenant: &str, item: Self::State) -> Step<Self::State, Self::Out>;

    /// Minimum delay before retried items may be redelivered. The transport
    /// must not redeliver earlier; the policy may vary with the retry count.
    fn retry_delay(&self, items: &[Self::State], retry_count: u32) -> Duration {
        let _ = (items, retry_count);
        DEFAULT_RETRY_DELAY
    }
}

/// One-input-to-many-outputs transformation shape. Retry semantics are
/// identical to [`OneToOne`].
pub trait OneToMany: Send + Sync {
    type State: Send;
    type Out: Send;

    fn process(&self, tenant: &str, item: Self::State) -> Step<Self::State, Vec<Self::Out>>;

    fn retry_delay(&self, items: &[Self::State], retry_count: u32) -> Duration {
        let _ = (items, retry_count);
        DEFAULT_RETRY_DELAY
    }
}

/// A processing stage is one of the two transformation shapes; the executor
/// is agnostic to which.
pub enum Stage<'a, S, O> {
    OneToOne(&'a dyn OneToOne<State = S, Out = O>),
    OneToMany(&'a dyn OneToMany<State = S, Out = O>),
}

/// Classified results of running a batch of items through a stage.
#[derive(Debug)]
pub struct StageRun<S, O> {
    pub outputs: Vec<O>,
    pub retries: Vec<S>,
    pub retry_delay: Duration,
    pub dropped: usize,
}

impl<S: Send, O: Send> Stage<'_, S, O> {
    pub fn run(&self, tenant: &str, items: Vec<S>, retry_count: u32) -> StageRun<S, O> {
        let mut run = StageRun {
            outputs: Vec::new(),
            retries: Vec::new(),
            retry_delay: DEFAULT_RETRY_DELAY,
            dropped: 0,
        };

        for item in items {
            match self {
                Stage::OneToOne(stage) => match stage.process(tenant, item) {
                    Step::Output(out) => run.outputs.push(out),
                    Step::Retry(state) => run.retries.push(state),
                    Step::Drop(reason) => {
                        warn!(%reason, "work item dropped");
                        run.dropped += 1;
                    }
                },
                Stage::OneToMany(stage) => match stage.process(tenant, item) {
                    Step::Output(outs) => run.outputs.extend(outs),
                    Step::Retry(state) => run.retries.push(state),
                    Step::Drop(reason) => {
                        warn!(%reason, "work item dropped");
                        run.dropped += 1;
                    }
                },
            }
        }

        run.retry_delay = match self {
            Stage::OneToOne(stage) => stage.retry_delay(&run.retries, retry_count),
            Stage::OneToMany(stage) => stage.retry_delay(&run.retries, retry_count),
        };
        run
    }
}
