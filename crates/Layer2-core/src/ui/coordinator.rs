//! Coordinator - 협력자 호출을 하나의 지정 컨텍스트로 모은다
//!
//! 채널을 받는 단일 태스크가 작업을 순서대로 실행한다. 호출자가 어느 태스크에 있든
//! UI/터미널 협력자는 항상 이 태스크에서만 불린다.

use super::bridge::Collaborators;
use eterm_foundation::{Error, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type Job = Box<dyn FnOnce(&Collaborators) + Send>;

#[derive(Clone)]
pub struct Coordinator {
    jobs: mpsc::UnboundedSender<Job>,
}

impl Coordinator {
    /// 코디네이션 태스크 시작 (런타임 안에서 호출)
    pub fn spawn(collaborators: Collaborators) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job(&collaborators);
            }
            debug!("Coordinator stopped");
        });
        Self { jobs }
    }

    /// 결과를 기다리지 않는 작업
    pub fn post<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce(&Collaborators) + Send + 'static,
    {
        self.jobs
            .send(Box::new(job))
            .map_err(|_| Error::Internal("coordinator stopped".to_string()))
    }

    /// 작업을 실행하고 결과를 돌려받는다
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&Collaborators) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.post(move |collaborators| {
            let _ = tx.send(job(collaborators));
        })?;
        rx.await
            .map_err(|_| Error::Internal("coordinator dropped job".to_string()))
    }
}
