use std::sync::Mutex;
use std::thread::JoinHandle;

use tracing::{error, info};

use crate::app::adb::bridge::DeviceBridge;
use crate::app::cancel::CancelToken;
use crate::app::error::AppError;
use crate::app::models::{ScrapeEvent, ScrapeSummary};
use crate::app::scrape::engine::{run_scrape, EventEmitter, ScrapeConfig};

pub struct ScrapeHandle {
    pub trace_id: String,
    cancel: CancelToken,
    thread: JoinHandle<Result<ScrapeSummary, AppError>>,
}

impl ScrapeHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> Result<ScrapeSummary, AppError> {
        self.thread
            .join()
            .map_err(|_| AppError::system("Scrape worker panicked", &self.trace_id))?
    }
}

pub fn start_scrape<B>(bridge: B, config: ScrapeConfig, emit: EventEmitter) -> Result<ScrapeHandle, AppError>
where
    B: DeviceBridge + 'static,
{
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let trace_id = config.trace_id.clone();

    let thread = std::thread::Builder::new()
        .name("sweepware-scrape".to_string())
        .spawn(move || {
            let result = run_scrape(&bridge, &config, &worker_cancel, &emit);
            match &result {
                Ok(summary) => emit(ScrapeEvent::Finished {
                    summary: summary.clone(),
                }),
                Err(err) => {
                    error!(trace_id = %err.trace_id, code = %err.code, error = %err.error, "scrape failed");
                    emit(ScrapeEvent::Failed {
                        error: err.error.clone(),
                        code: err.code.clone(),
                    });
                }
            }
            result
        })
        .map_err(|err| AppError::system(format!("Failed to start scrape worker: {err}"), &trace_id))?;

    Ok(ScrapeHandle {
        trace_id,
        cancel,
        thread,
    })
}

#[derive(Default)]
pub struct AppState {
    active: Mutex<Option<ScrapeHandle>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start<B>(&self, bridge: B, config: ScrapeConfig, emit: EventEmitter) -> Result<String, AppError>
    where
        B: DeviceBridge + 'static,
    {
        let mut guard = self
            .active
            .lock()
            .map_err(|_| AppError::system("Scrape registry locked", &config.trace_id))?;
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(AppError::validation(
                "A scrape is already running",
                &config.trace_id,
            ));
        }
        let handle = start_scrape(bridge, config, emit)?;
        let trace_id = handle.trace_id.clone();
        info!(trace_id = %trace_id, "scrape worker started");
        *guard = Some(handle);
        Ok(trace_id)
    }

    pub fn cancel(&self) -> bool {
        match self.active.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(handle) if !handle.is_finished() => {
                    handle.cancel();
                    true
                }
                _ => false,
            },
            Err(_) => false,
        }
    }

    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.active
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(ScrapeHandle::cancel_token))
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    pub fn wait(&self, trace_id: &str) -> Result<ScrapeSummary, AppError> {
        let handle = self
            .active
            .lock()
            .map_err(|_| AppError::system("Scrape registry locked", trace_id))?
            .take()
            .ok_or_else(|| AppError::validation("No scrape is running", trace_id))?;
        handle.join()
    }
}
