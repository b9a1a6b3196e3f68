use log::info;

use crate::error::SchedulerError;

/// The three stages every frame runs through, in this order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpdateStage {
    /// Transport events, connection changes, inbound dispatch
    Early,
    /// Tick advance
    Pre,
    /// Outbound flush, telemetry, deferred expiry, teardown
    PostLate,
}

impl UpdateStage {
    pub fn next(&self) -> UpdateStage {
        match self {
            UpdateStage::Early => UpdateStage::Pre,
            UpdateStage::Pre => UpdateStage::PostLate,
            UpdateStage::PostLate => UpdateStage::Early,
        }
    }
}

/// Stage cursor for a running session. Holds nothing but the cursor and the
/// shutdown flag; every piece of session state lives with its owner.
pub struct UpdateScheduler {
    registered: bool,
    next_stage: UpdateStage,
    running: Option<UpdateStage>,
    shutdown_requested: bool,
    frame_count: u64,
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateScheduler {
    pub fn new() -> Self {
        Self {
            registered: false,
            next_stage: UpdateStage::Early,
            running: None,
            shutdown_requested: false,
            frame_count: 0,
        }
    }

    pub fn register(&mut self) {
        info!("Registering update stages");
        self.registered = true;
        self.next_stage = UpdateStage::Early;
        self.running = None;
        self.shutdown_requested = false;
        self.frame_count = 0;
    }

    pub fn unregister(&mut self) {
        info!("Unregistering update stages after {} frames", self.frame_count);
        self.registered = false;
        self.next_stage = UpdateStage::Early;
        self.shutdown_requested = false;
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Marks `stage` as running. Returns `Ok(false)` when no session is
    /// registered, in which case the stage body must be skipped.
    pub fn begin_stage(&mut self, stage: UpdateStage) -> Result<bool, SchedulerError> {
        if !self.registered {
            return Ok(false);
        }
        if let Some(running) = self.running {
            return Err(SchedulerError::Reentered {
                running,
                requested: stage,
            });
        }
        if stage != self.next_stage {
            return Err(SchedulerError::OutOfOrder {
                expected: self.next_stage,
                requested: stage,
            });
        }
        self.running = Some(stage);
        Ok(true)
    }

    /// Moves the cursor past `stage`. Runs whether or not the stage body
    /// succeeded, so the next stage and the next frame proceed normally.
    pub fn end_stage(&mut self, stage: UpdateStage) {
        self.running = None;
        self.next_stage = stage.next();
        if stage == UpdateStage::PostLate {
            self.frame_count += 1;
        }
    }

    pub fn next_stage(&self) -> UpdateStage {
        self.next_stage
    }

    pub fn running_stage(&self) -> Option<UpdateStage> {
        self.running
    }

    /// Teardown runs as the last step of the next PostLate stage
    pub fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}
