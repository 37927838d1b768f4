use meshvault_catalog::ModelId;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// A stored model waiting for geometry analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisJob {
    pub model_id: ModelId,
    pub path: PathBuf,
    pub content_hash: String,
}

/// Hand-off to whatever performs background analysis. Enqueueing never
/// waits for the analysis itself.
pub trait AnalysisQueue: Send + Sync {
    /// Returns `false` if the job was not accepted.
    fn enqueue(&self, job: AnalysisJob) -> bool;
}

/// Forwards jobs to a channel drained elsewhere.
#[derive(Debug, Clone)]
pub struct ChannelAnalysisQueue {
    tx: mpsc::UnboundedSender<AnalysisJob>,
}
impl ChannelAnalysisQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AnalysisJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}
impl AnalysisQueue for ChannelAnalysisQueue {
    fn enqueue(&self, job: AnalysisJob) -> bool {
        self.tx.send(job).is_ok()
    }
}

/// Analysis disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAnalysis;
impl AnalysisQueue for NoAnalysis {
    fn enqueue(&self, _job: AnalysisJob) -> bool {
        false
    }
}
