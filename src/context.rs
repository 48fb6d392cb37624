use rand::Rng;

/// Options of one trial invocation. Built once per call and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialOptions {
    /// Namespace and task-name discriminator; shared by a baseline trial and
    /// the update trial that follows it.
    pub trial_id: u32,
    /// Deploy the old version from scratch (baseline) instead of updating.
    pub use_old: bool,
    /// Run every phase but record no events.
    pub dry_run: bool,
    /// Start the experiment's workload generator alongside the container.
    pub workload: bool,
    /// Echo child process output at debug level.
    pub debug: bool,
}

impl TrialOptions {
    pub fn new(trial_id: u32) -> Self {
        TrialOptions {
            trial_id,
            use_old: false,
            dry_run: false,
            workload: false,
            debug: false,
        }
    }

    /// Options with a fresh random trial id.
    pub fn random() -> Self {
        TrialOptions::new(random_trial_id())
    }

    pub fn baseline(mut self) -> Self {
        self.use_old = true;
        self
    }

    pub fn update(mut self) -> Self {
        self.use_old = false;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_workload(mut self, workload: bool) -> Self {
        self.workload = workload;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// `-scratch` for baseline trials, `-update` otherwise.
    pub fn task_suffix(&self) -> &'static str {
        if self.use_old {
            "-scratch"
        } else {
            "-update"
        }
    }

    /// Event method for a strategy, e.g. `estargz-scratch`.
    pub fn method(&self, strategy_name: &str) -> String {
        format!("{}{}", strategy_name, self.task_suffix())
    }
}

pub fn random_trial_id() -> u32 {
    rand::thread_rng().gen_range(1..999_999)
}

/// Network condition and round a trial is recorded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrialKey {
    pub rtt: u32,
    pub round: usize,
}

impl TrialKey {
    pub fn new(rtt: u32, round: usize) -> Self {
        TrialKey { rtt, round }
    }
}

/// Phases that can abort a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pull,
    Create,
}

impl Phase {
    /// Name of the terminal event recorded when the phase times out.
    pub fn timeout_event(&self) -> &'static str {
        match self {
            Phase::Pull => "pull-timeout",
            Phase::Create => "create-timeout",
        }
    }
}

/**
 * TrialOutcome
 * What a single trial reports back to the sweep. `duration` is the
 * start-to-ready time in seconds, `None` when the trial aborted or the
 * container never became ready.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct TrialOutcome {
    pub trial_id: u32,
    pub method: String,
    pub duration: Option<f64>,
    pub aborted: Option<Phase>,
}

impl TrialOutcome {
    pub fn ready(trial_id: u32, method: &str, duration: f64) -> Self {
        TrialOutcome {
            trial_id,
            method: method.to_string(),
            duration: Some(duration),
            aborted: None,
        }
    }

    pub fn not_ready(trial_id: u32, method: &str) -> Self {
        TrialOutcome {
            trial_id,
            method: method.to_string(),
            duration: None,
            aborted: None,
        }
    }

    pub fn aborted(trial_id: u32, method: &str, phase: Phase) -> Self {
        TrialOutcome {
            trial_id,
            method: method.to_string(),
            duration: None,
            aborted: Some(phase),
        }
    }

    /// Duration for result tables, NaN for failed trials.
    pub fn delta(&self) -> f64 {
        self.duration.unwrap_or(f64::NAN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_follows_suffix() {
        let options = TrialOptions::new(42);
        assert_eq!(options.method("vanilla"), "vanilla-update");
        assert_eq!(options.clone().baseline().method("vanilla"), "vanilla-scratch");
    }

    #[test]
    fn test_outcome_delta_is_nan_when_failed() {
        assert!(TrialOutcome::aborted(1, "vanilla-update", Phase::Pull).delta().is_nan());
        assert!(TrialOutcome::not_ready(1, "vanilla-update").delta().is_nan());
        assert_eq!(TrialOutcome::ready(1, "vanilla-update", 2.5).delta(), 2.5);
        assert_eq!(Phase::Create.timeout_event(), "create-timeout");
    }

    #[test]
    fn test_random_ids_are_nonzero() {
        for _ in 0..100 {
            assert!(TrialOptions::random().trial_id > 0);
        }
    }
}
