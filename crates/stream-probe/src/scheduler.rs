//! Drives a [`Prober`] over the candidate list.
//!
//! Runs are an explicit sequence of passes ([`ProbePass::SEQUENCE`]): the generated list
//! unauthenticated, then (only without a winner and only with caller credentials) the
//! credentialed variants nobody tried yet. Each pass probes fixed-size batches concurrently
//! and stops issuing batches once one reports a success. `max_candidates` bounds the whole
//! run, so the credentialed pass only gets what the first pass left over.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use telemetry::metrics::BRIDGE_PROBE_RUNS;
use tracing::{debug, info, warn};

use crate::candidates::{CandidateError, CandidateGenerator};
use crate::config::ProbeConfig;
use crate::prober::{Prober, TieredProber};
use crate::types::{
    redact_url, Candidate, ProbeOutcome, ProbePass, ProbeReport, ProbeRequest, ProbeResult,
};

pub struct ProbeScheduler {
    prober: Arc<dyn Prober>,
    generator: CandidateGenerator,
    concurrency: usize,
}

/// Bookkeeping shared by the passes of one run.
#[derive(Default)]
struct RunState {
    tried: HashSet<String>,
    results: Vec<ProbeResult>,
    /// Best lightweight signal so far, with its rank.
    fallback: Option<(u8, Candidate)>,
}

impl RunState {
    /// Record one candidate's attempts; true when any of them verified the stream.
    fn record(&mut self, candidate: &Candidate, attempts: Vec<ProbeResult>) -> bool {
        self.tried.insert(candidate.url().to_string());

        let rank = attempts
            .iter()
            .filter(|r| r.probe_type.is_lightweight() && r.responded())
            .map(|r| match r.status_code {
                Some(200..=299) => 2,
                _ => 1,
            })
            .max();
        if let Some(rank) = rank {
            let better = self.fallback.as_ref().map_or(true, |(best, _)| rank > *best);
            if better {
                self.fallback = Some((rank, candidate.clone()));
            }
        }

        let success = attempts.iter().any(|r| r.success);
        self.results.extend(attempts);
        success
    }

    fn outcome(&self) -> ProbeOutcome {
        let mut challenged = false;
        for result in self.results.iter().filter(|r| r.requires_auth) {
            if result.credentialed {
                return ProbeOutcome::CredentialsRejected;
            }
            challenged = true;
        }
        let credentials_tried = self.results.iter().any(|r| r.credentialed);
        if challenged && !credentials_tried {
            ProbeOutcome::AuthenticationRequired
        } else if self.fallback.is_some() {
            ProbeOutcome::Reachable
        } else {
            ProbeOutcome::Unreachable
        }
    }
}

impl ProbeScheduler {
    pub fn new(prober: Arc<dyn Prober>, config: &ProbeConfig) -> Self {
        Self::with_limits(prober, config.concurrency, config.max_candidates)
    }

    pub fn with_limits(prober: Arc<dyn Prober>, concurrency: usize, max_candidates: usize) -> Self {
        Self {
            prober,
            generator: CandidateGenerator::new(max_candidates),
            concurrency: concurrency.max(1),
        }
    }

    /// Scheduler over the network and deep-probe tiers described by `config`.
    pub fn from_config(config: &ProbeConfig) -> Result<Self> {
        let prober = TieredProber::from_config(config)?;
        Ok(Self::new(Arc::new(prober), config))
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Discover a working stream for `request`.
    ///
    /// Only an unusable target is an error; every probe failure is reported as data.
    pub async fn run(&self, request: &ProbeRequest) -> Result<ProbeReport, CandidateError> {
        let seeds = self.generator.generate(
            &request.target,
            request.transport,
            request.vendor_hint.as_deref(),
        )?;
        let target = redact_url(&request.target);
        let credentials = request.credentials();

        let deep_available = self.prober.deep_probe_available().await;
        if !deep_available {
            warn!(target = %target, "deep-probe tool unavailable, probing is lightweight only");
        }
        info!(
            target = %target,
            candidates = seeds.len(),
            concurrency = self.concurrency,
            has_credentials = credentials.is_some(),
            "starting stream discovery"
        );

        let mut state = RunState::default();
        let mut winner = None;

        for pass in ProbePass::SEQUENCE {
            let candidates = match pass {
                ProbePass::Unauthenticated => seeds.clone(),
                ProbePass::Credentialed => match &credentials {
                    Some(creds) => self.generator.with_credentials(&seeds, creds, &state.tried),
                    None => break,
                },
            };
            debug!(pass = pass.as_str(), candidates = candidates.len(), "probe pass");

            if let Some(found) = self
                .run_pass(pass, candidates, deep_available, &mut state)
                .await
            {
                winner = Some((found, pass));
                break;
            }
        }

        let outcome = match winner {
            Some(_) => ProbeOutcome::Verified,
            None => state.outcome(),
        };
        BRIDGE_PROBE_RUNS.with_label_values(&[outcome.as_str()]).inc();

        let (winner, winning_pass) = match winner {
            Some((candidate, pass)) => (Some(candidate), Some(pass)),
            None => (None, None),
        };
        let report = ProbeReport {
            outcome,
            fallback: match winner {
                Some(_) => None,
                None => state.fallback.map(|(_, candidate)| candidate),
            },
            winner,
            winning_pass,
            deep_probe_available: deep_available,
            candidates_tried: state.tried.len(),
            results: state.results,
        };

        info!(
            target = %target,
            outcome = outcome.as_str(),
            winner = report.winner.as_ref().map(|c| c.redacted_url()).as_deref().unwrap_or("-"),
            candidates_tried = report.candidates_tried,
            attempts = report.results.len(),
            "stream discovery finished"
        );
        Ok(report)
    }

    async fn run_pass(
        &self,
        pass: ProbePass,
        mut candidates: Vec<Candidate>,
        deep_available: bool,
        state: &mut RunState,
    ) -> Option<Candidate> {
        let budget = self
            .generator
            .max_candidates()
            .saturating_sub(state.tried.len());
        if budget < candidates.len() {
            debug!(
                pass = pass.as_str(),
                skipped = candidates.len() - budget,
                "candidate cap reached"
            );
        }
        candidates.truncate(budget);

        for batch in candidates.chunks(self.concurrency) {
            let attempts = join_all(
                batch
                    .iter()
                    .map(|candidate| self.prober.probe(candidate, deep_available)),
            )
            .await;

            // whole batch settled; keep list order so earlier candidates win ties
            let mut found = None;
            for (candidate, attempts) in batch.iter().zip(attempts) {
                if state.record(candidate, attempts) && found.is_none() {
                    found = Some(candidate.clone());
                }
            }
            if let Some(candidate) = found {
                info!(
                    pass = pass.as_str(),
                    url = %candidate.redacted_url(),
                    transport = %candidate.transport(),
                    "stream verified"
                );
                return Some(candidate);
            }
        }
        None
    }
}
