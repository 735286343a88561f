use crate::domain::ports::QueuedJob;
use crate::utils::error::{Result, ValidatorError};
use tokio::sync::mpsc::{self, error::TrySendError, OwnedPermit};

/// 有上限的 job 佇列，滿了之後非阻塞提交會回報 server busy
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<QueuedJob>,
    capacity: usize,
}

#[derive(Debug)]
pub struct JobReceiver {
    receiver: mpsc::Receiver<QueuedJob>,
}

/// A reserved place in the queue; sending through it cannot fail.
#[derive(Debug)]
pub struct JobSlot {
    permit: OwnedPermit<QueuedJob>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> (Self, JobReceiver) {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender, capacity }, JobReceiver { receiver })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// 佇列滿時等待空位
    pub async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        self.sender
            .send(job)
            .await
            .map_err(|_| ValidatorError::QueueClosed)
    }

    pub fn reserve(&self) -> Result<JobSlot> {
        match self.sender.clone().try_reserve_owned() {
            Ok(permit) => Ok(JobSlot { permit }),
            Err(TrySendError::Full(_)) => Err(ValidatorError::ServerBusy {
                capacity: self.capacity,
            }),
            Err(TrySendError::Closed(_)) => Err(ValidatorError::QueueClosed),
        }
    }
}

impl JobSlot {
    pub fn send(self, job: QueuedJob) {
        self.permit.send(job);
    }
}

impl JobReceiver {
    pub async fn recv(&mut self) -> Option<QueuedJob> {
        self.receiver.recv().await
    }

    /// 停止接收新 job，已在佇列中的仍可取出
    pub fn close(&mut self) {
        self.receiver.close();
    }
}
