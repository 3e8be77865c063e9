//! One pass over a subscription
//!
//! accounts -> non-production filter -> key -> session -> offers ->
//! aggregation -> policy -> apply. Passes are strictly sequential.

use crate::classifier::AccountClassifier;
use crate::engine::{ConsumptionAggregator, Decision, DownscalePolicy};
use crate::error::{Result, WatchdogError};
use crate::models::{Account, Offer, OfferScope};
use crate::observability::{StructuredLogger, WatchdogMetrics};
use crate::paging::PagedResourceIterator;
use crate::providers::{AccountProvider, DatabaseConnector, DatabaseSession, MetricsProvider};
use crate::report::{DownscaleRecord, PassReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// What a pass covers and how it behaves
#[derive(Debug, Clone)]
pub struct PassOptions {
    pub subscription_id: String,
    pub resource_group: Option<String>,
    /// Decide and report without updating any offer
    pub dry_run: bool,
    /// Top level deadline; reads in progress are abandoned when it passes, an
    /// offer update already issued runs to completion
    pub timeout: Option<Duration>,
}

impl PassOptions {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: None,
            dry_run: false,
            timeout: None,
        }
    }

    pub fn with_resource_group(mut self, resource_group: Option<String>) -> Self {
        self.resource_group = resource_group.filter(|rg| !rg.trim().is_empty());
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Drives passes over the provider estate
pub struct Watchdog {
    accounts: Arc<dyn AccountProvider>,
    connector: Arc<dyn DatabaseConnector>,
    metrics_provider: Arc<dyn MetricsProvider>,
    classifier: AccountClassifier,
    policy: DownscalePolicy,
    metrics: WatchdogMetrics,
}

impl Watchdog {
    pub fn new(
        accounts: Arc<dyn AccountProvider>,
        connector: Arc<dyn DatabaseConnector>,
        metrics_provider: Arc<dyn MetricsProvider>,
    ) -> Self {
        Self {
            accounts,
            connector,
            metrics_provider,
            classifier: AccountClassifier::new(),
            policy: DownscalePolicy::new(),
            metrics: WatchdogMetrics::new(),
        }
    }

    pub fn with_policy(mut self, policy: DownscalePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run one pass and return its report
    ///
    /// Only listing failures abort the pass. Key, metric and update failures
    /// are logged and the pass moves on.
    pub async fn run_pass(&self, options: &PassOptions) -> Result<PassReport> {
        let logger = StructuredLogger::new(&options.subscription_id);
        logger.log_pass_started(options.resource_group.as_deref(), options.dry_run);
        let started = Instant::now();

        let result = self.run_accounts(options, &logger).await;

        let elapsed = started.elapsed();
        self.metrics
            .observe_pass(elapsed.as_secs_f64(), result.is_ok());
        match &result {
            Ok(report) => logger.log_pass_completed(
                report.accounts_evaluated,
                report.offers_evaluated,
                report.downscaled.len(),
                elapsed.as_millis(),
            ),
            Err(err) => logger.log_pass_failed(err),
        }

        result
    }

    async fn run_accounts(&self, options: &PassOptions, logger: &StructuredLogger) -> Result<PassReport> {
        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
        let accounts = self
            .accounts
            .list_accounts(&options.subscription_id, options.resource_group.as_deref())
            .await
            .map_err(|source| WatchdogError::provider("list accounts", source))?;

        let mut report = PassReport::default();
        for account in accounts
            .iter()
            .filter(|account| self.classifier.is_non_production(account))
        {
            info!(account = %account.name, "Evaluating account");
            let flow = self
                .process_account(account, options, deadline, logger, &mut report)
                .await?;

            if let Flow::DeadlineExceeded = flow {
                warn!(account = %account.name, "Pass deadline exceeded, returning partial report");
                report.deadline_exceeded = true;
                break;
            }
        }

        Ok(report)
    }

    async fn process_account(
        &self,
        account: &Account,
        options: &PassOptions,
        deadline: Option<Instant>,
        logger: &StructuredLogger,
        report: &mut PassReport,
    ) -> Result<Flow> {
        report.accounts_evaluated += 1;
        self.metrics.inc_accounts_evaluated();

        let Some(key) = bounded(deadline, self.accounts.primary_key(account)).await else {
            return Ok(Flow::DeadlineExceeded);
        };
        let key = match key {
            Ok(key) => key,
            Err(err) => {
                logger.log_account_skipped(account, &err.to_string());
                report.accounts_skipped += 1;
                self.metrics.inc_accounts_skipped();
                return Ok(Flow::Continue);
            }
        };

        let Some(session) = bounded(deadline, self.connector.connect(account, &key)).await else {
            return Ok(Flow::DeadlineExceeded);
        };
        let session = match session {
            Ok(session) => session,
            Err(err) => {
                logger.log_account_skipped(account, &err.to_string());
                report.accounts_skipped += 1;
                self.metrics.inc_accounts_skipped();
                return Ok(Flow::Continue);
            }
        };
        let session: &dyn DatabaseSession = session.as_ref();

        let mut offers =
            PagedResourceIterator::new(move |token, size| session.list_offers(token, size));
        loop {
            let Some(next) = bounded(deadline, offers.next()).await else {
                return Ok(Flow::DeadlineExceeded);
            };
            let Some(offer) =
                next.map_err(|source| WatchdogError::provider("list offers", source))?
            else {
                return Ok(Flow::Continue);
            };

            report.offers_evaluated += 1;
            self.metrics.inc_offers_evaluated();

            let assessment = self.assess_offer(account, session, &offer, logger);
            let Some(target) = bounded(deadline, assessment).await else {
                return Ok(Flow::DeadlineExceeded);
            };
            if let Some(target) = target? {
                self.apply(account, session, &offer, target, options, logger, report)
                    .await;
            }
        }
    }

    async fn collection_links(&self, session: &dyn DatabaseSession, offer: &Offer) -> Result<Vec<String>> {
        match offer.scope() {
            OfferScope::Collection => Ok(vec![offer.resource_link.clone()]),
            OfferScope::SharedDatabase => {
                let database_link = offer.resource_link.as_str();
                let mut collections = PagedResourceIterator::new(move |token, size| {
                    session.list_collections(database_link, token, size)
                });
                collections
                    .try_collect()
                    .await
                    .map_err(|source| WatchdogError::provider("list collections", source))
            }
        }
    }

    /// Read-only half of an offer's evaluation; returns the downscale target
    async fn assess_offer(
        &self,
        account: &Account,
        session: &dyn DatabaseSession,
        offer: &Offer,
        logger: &StructuredLogger,
    ) -> Result<Option<u32>> {
        if let Some(reason) = self.policy.screen(offer.throughput) {
            logger.log_allocation_evaluated(account, offer, 0.0, &Decision::Skip(reason));
            return Ok(None);
        }

        let collection_links = self.collection_links(session, offer).await?;

        let aggregator =
            ConsumptionAggregator::new(account, session, self.metrics_provider.as_ref(), logger);
        let max_consumed = match aggregator
            .max_consumed(offer.throughput, &collection_links)
            .await
        {
            Ok(summary) => summary.max_consumed(),
            Err(err) => {
                logger.log_allocation_skipped(account, offer, &err.to_string());
                return Ok(None);
            }
        };

        let decision = match self.policy.decide(offer, max_consumed, session).await {
            Ok(decision) => decision,
            Err(err) => {
                logger.log_allocation_skipped(account, offer, &err.to_string());
                return Ok(None);
            }
        };
        logger.log_allocation_evaluated(account, offer, max_consumed, &decision);

        match decision {
            Decision::DownscaleTo(target) => Ok(Some(target)),
            Decision::Skip(_) => Ok(None),
        }
    }

    /// Apply a downscale and record it. Runs outside the pass deadline so an
    /// update the provider may already have accepted is always reported.
    #[allow(clippy::too_many_arguments)]
    async fn apply(
        &self,
        account: &Account,
        session: &dyn DatabaseSession,
        offer: &Offer,
        target: u32,
        options: &PassOptions,
        logger: &StructuredLogger,
        report: &mut PassReport,
    ) {
        if !options.dry_run {
            if let Err(err) = session.replace_offer(offer, target).await {
                logger.log_downscale_failed(account, offer, target, &err);
                report.downscale_failures += 1;
                self.metrics.inc_downscale_failures();
                return;
            }
            self.metrics.record_downscale(offer.throughput, target);
        }

        logger.log_downscaled(account, offer, target, !options.dry_run);
        report.downscaled.push(DownscaleRecord {
            account: account.name.clone(),
            resource_link: offer.resource_link.clone(),
            scope: offer.scope(),
            previous_throughput: offer.throughput,
            new_throughput: target,
            applied: !options.dry_run,
        });
    }
}

enum Flow {
    Continue,
    DeadlineExceeded,
}

/// Run `work` unless the deadline has passed or passes first
async fn bounded<F: std::future::Future>(deadline: Option<Instant>, work: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => None,
        Some(deadline) => tokio::time::timeout_at(deadline, work).await.ok(),
        None => Some(work.await),
    }
}
