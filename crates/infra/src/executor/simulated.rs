use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use signet_core::{AttemptError, AttemptOutcome, OperationRequest};

use super::RemoteOperation;

/// In-process stand-in for the unreliable remote service.
///
/// Each attempt succeeds with `success_probability`; the randomness comes from
/// an injected seeded generator so runs are reproducible.
#[derive(Debug)]
pub struct SimulatedOperation {
    rng: Mutex<StdRng>,
    success_probability: f64,
}

impl SimulatedOperation {
    pub fn seeded(seed: u64, success_probability: f64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), success_probability)
    }

    pub fn with_rng(rng: StdRng, success_probability: f64) -> Self {
        Self {
            rng: Mutex::new(rng),
            success_probability: success_probability.clamp(0.0, 1.0),
        }
    }

    fn roll(&self) -> bool {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen_bool(self.success_probability)
    }
}

#[async_trait]
impl RemoteOperation for SimulatedOperation {
    async fn attempt(&self, request: &OperationRequest) -> AttemptOutcome {
        if self.roll() {
            let payload = format!("simulated:{}", request.operation().name());
            AttemptOutcome::Success(payload.into_bytes())
        } else {
            AttemptOutcome::RetryableFailure(AttemptError::Simulated {
                message: "unlucky roll".to_string(),
                retryable: true,
            })
        }
    }
}
