pub use ingestcore::jobs::{Job, JobQueue};

use log::{debug, warn};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Hands jobs to a worker over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelJobQueue {
    sender: mpsc::UnboundedSender<Job>,
}

impl ChannelJobQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl JobQueue for ChannelJobQueue {
    fn enqueue(&self, job: Job) {
        let name = job.name();
        if self.sender.send(job).is_err() {
            warn!("Job worker is gone, dropping {name}");
        } else {
            debug!("Enqueued {name}");
        }
    }
}

/// Keeps every job in memory. Used by the replay tool and tests.
#[derive(Debug, Default)]
pub struct RecordingJobQueue {
    jobs: Mutex<Vec<Job>>,
}

impl RecordingJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().map(|jobs| jobs.clone()).unwrap_or_default()
    }

    /// Drain the recorded jobs.
    pub fn take(&self) -> Vec<Job> {
        self.jobs
            .lock()
            .map(|mut jobs| std::mem::take(&mut *jobs))
            .unwrap_or_default()
    }
}

impl JobQueue for RecordingJobQueue {
    fn enqueue(&self, job: Job) {
        debug!("Recorded {}", job.name());
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.push(job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_queue_delivers_in_order() {
        let (queue, mut receiver) = ChannelJobQueue::new();
        queue.enqueue(Job::RefreshOwnProfile);
        queue.enqueue(Job::StorageSync);
        assert_eq!(receiver.recv().await, Some(Job::RefreshOwnProfile));
        assert_eq!(receiver.recv().await, Some(Job::StorageSync));
    }

    #[test]
    fn recording_queue_take_drains() {
        let queue = RecordingJobQueue::new();
        queue.enqueue(Job::ViewOnceCleanup);
        assert_eq!(queue.take(), vec![Job::ViewOnceCleanup]);
        assert!(queue.jobs().is_empty());
    }
}
