//! Scan orchestration — one run from fetch to notification.
//!
//! Stages run strictly in order: Fetching, Filtering, Extracting,
//! Generating, Assembling. Each stage completes its whole batch before the
//! next starts, and no message moves backward. Cancellation is cooperative
//! and checked between stages only.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Duration, Utc};
use tracing::{error, info, warn};

use crate::config::{NotifyConfig, RetryConfig, ScanConfig};
use crate::llm::TopicGenerator;
use crate::mail::{FetchQuery, MailProvider};
use crate::notify::{Notifier, ScanSummary};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::dedup::Deduplicator;
use crate::pipeline::extract::ContentExtractor;
use crate::pipeline::types::{
    Category, Disposition, EmailMessage, ExtractedContent, MessageOutcome, ScanRun, ScanStatus,
};
use crate::retry::{RetryError, call_with_retry};
use crate::store::Store;

/// Pipeline stage, for logging and cancellation checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Fetching,
    Filtering,
    Extracting,
    Generating,
    Assembling,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Filtering => "filtering",
            Self::Extracting => "extracting",
            Self::Generating => "generating",
            Self::Assembling => "assembling",
        }
    }
}

pub struct ScanPipeline {
    mail: Arc<dyn MailProvider>,
    generator: TopicGenerator,
    store: Arc<dyn Store>,
    notifiers: Vec<Arc<dyn Notifier>>,
    notify: NotifyConfig,
    classifier: Classifier,
    extractor: ContentExtractor,
    scan: ScanConfig,
    retry: RetryConfig,
}

impl ScanPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mail: Arc<dyn MailProvider>,
        generator: TopicGenerator,
        store: Arc<dyn Store>,
        notifiers: Vec<Arc<dyn Notifier>>,
        notify: NotifyConfig,
        classifier: Classifier,
        scan: ScanConfig,
        retry: RetryConfig,
    ) -> Self {
        let extractor = ContentExtractor::new(&scan);
        Self {
            mail,
            generator,
            store,
            notifiers,
            notify,
            classifier,
            extractor,
            scan,
            retry,
        }
    }

    /// Execute one scan run for the given slot. Always returns a finished
    /// run; every failure path is folded into its status and error list.
    pub async fn run(&self, slot: &str, cancel: &AtomicBool) -> ScanRun {
        let mut run = ScanRun::new(slot);
        info!(run_id = %run.id, slot, "Scan run started");

        // ── Fetching ────────────────────────────────────────────────
        let messages = match self.fetch(&mut run).await {
            Some(messages) => messages,
            None => return self.finish(run).await,
        };

        if self.cancelled(cancel, Stage::Filtering, &mut run) {
            return self.finish(run).await;
        }

        // ── Filtering ───────────────────────────────────────────────
        let mut dedup = match self.store.load_processed_ids().await {
            Ok(ids) => Deduplicator::new(ids),
            Err(e) => {
                run.errors.push(format!("loading processed ids: {e}"));
                run.status = ScanStatus::Failed;
                return self.finish(run).await;
            }
        };
        let pruned = dedup.prune(Utc::now() - Duration::days(i64::from(self.scan.retention_days)));
        if pruned > 0 {
            info!(pruned, "Pruned expired processed ids");
        }

        let survivors = self.filter(messages, &mut dedup, &mut run);

        if self.cancelled(cancel, Stage::Extracting, &mut run) {
            return self.save_and_finish(run, &dedup).await;
        }

        // ── Extracting ──────────────────────────────────────────────
        let mut contents = self.extract(survivors, &mut run);
        // Evidence cap: at most one source per requested topic.
        contents.truncate(self.scan.max_topics_per_scan);

        if self.cancelled(cancel, Stage::Generating, &mut run) {
            return self.save_and_finish(run, &dedup).await;
        }

        // ── Generating ──────────────────────────────────────────────
        match self.generator.generate(&contents).await {
            Ok(topics) => {
                // ── Assembling ──────────────────────────────────────
                info!(
                    stage = Stage::Assembling.as_str(),
                    candidates = topics.len(),
                    "Stage started"
                );
                run.counters.topics = topics.len();
                run.topics = topics;
                if run.topics.is_empty() {
                    run.errors.push("no usable topics produced".to_string());
                    run.status = ScanStatus::Failed;
                } else if run.had_message_failures() {
                    run.status = ScanStatus::Partial;
                } else {
                    run.status = ScanStatus::Succeeded;
                }
            }
            Err(e) => {
                error!(error = %e, "Topic generation failed");
                run.errors.push(format!("topic generation: {e}"));
                run.status = ScanStatus::Failed;
            }
        }

        self.save_and_finish(run, &dedup).await
    }

    /// Fetch with retry. On failure, marks the run failed and returns
    /// `None`; the error is pipeline-level, never per-message.
    async fn fetch(&self, run: &mut ScanRun) -> Option<Vec<EmailMessage>> {
        info!(stage = Stage::Fetching.as_str(), "Stage started");
        let query = FetchQuery {
            labels: self.scan.labels.clone(),
            since: Utc::now() - Duration::days(i64::from(self.scan.lookback_days)),
            limit: self.scan.max_emails_per_scan,
        };

        let result = call_with_retry("mail_fetch", &self.retry, || self.mail.fetch(&query)).await;
        match result {
            Ok(mut messages) => {
                // Providers should honor the limit; enforce it regardless.
                messages.truncate(self.scan.max_emails_per_scan);
                run.counters.fetched = messages.len();
                info!(fetched = messages.len(), "Fetch complete");
                Some(messages)
            }
            Err(e) => {
                let detail = match &e {
                    RetryError::Exhausted { attempts, last } => {
                        format!("mail fetch exhausted after {attempts} attempts: {last}")
                    }
                    RetryError::Fatal(last) => format!("mail fetch failed: {last}"),
                };
                error!(error = %detail, "Fetch failed, aborting run");
                run.errors.push(detail);
                run.status = ScanStatus::Failed;
                None
            }
        }
    }

    /// Dedup + classify. Returns messages that survived with their verdicts.
    fn filter(
        &self,
        messages: Vec<EmailMessage>,
        dedup: &mut Deduplicator,
        run: &mut ScanRun,
    ) -> Vec<(EmailMessage, Category, f32)> {
        let mut survivors = Vec::new();
        for message in messages {
            if !dedup.admit(&message.id) {
                run.counters.duplicates += 1;
                run.outcomes.push(MessageOutcome {
                    message_id: message.id,
                    sender: message.sender,
                    subject: message.subject,
                    disposition: Disposition::Duplicate,
                });
                continue;
            }

            let verdict = self.classifier.classify(&message);
            if verdict.category == Category::Excluded {
                run.counters.filtered_out += 1;
                let reason = verdict
                    .exclusion_reason
                    .unwrap_or_else(|| "excluded".to_string());
                run.outcomes.push(MessageOutcome {
                    message_id: message.id,
                    sender: message.sender,
                    subject: message.subject,
                    disposition: Disposition::FilteredOut { reason },
                });
                continue;
            }

            survivors.push((message, verdict.category, verdict.score));
        }
        info!(
            survivors = survivors.len(),
            duplicates = run.counters.duplicates,
            filtered_out = run.counters.filtered_out,
            "Filtering complete"
        );
        survivors
    }

    /// Extract content from classified messages. Per-message failures are
    /// counted, never fatal.
    fn extract(
        &self,
        survivors: Vec<(EmailMessage, Category, f32)>,
        run: &mut ScanRun,
    ) -> Vec<ExtractedContent> {
        let mut contents = Vec::new();
        for (message, category, score) in survivors {
            match self.extractor.extract(&message, category) {
                Ok(content) => {
                    run.counters.extracted += 1;
                    run.outcomes.push(MessageOutcome {
                        message_id: message.id,
                        sender: message.sender,
                        subject: message.subject,
                        disposition: Disposition::Extracted { category, score },
                    });
                    contents.push(content);
                }
                Err(failure) => {
                    run.counters.extraction_failures += 1;
                    warn!(message_id = %message.id, error = %failure, "Extraction failed");
                    run.outcomes.push(MessageOutcome {
                        message_id: message.id,
                        sender: message.sender,
                        subject: message.subject,
                        disposition: Disposition::ExtractionFailed {
                            reason: failure.to_string(),
                        },
                    });
                }
            }
        }
        contents
    }

    fn cancelled(&self, cancel: &AtomicBool, next: Stage, run: &mut ScanRun) -> bool {
        if cancel.load(Ordering::Relaxed) {
            warn!(stage = next.as_str(), "Scan cancelled before stage");
            run.errors.push("scan cancelled".to_string());
            run.status = ScanStatus::Failed;
            true
        } else {
            false
        }
    }

    /// Persist the processed-id snapshot, then finish the run.
    async fn save_and_finish(&self, mut run: ScanRun, dedup: &Deduplicator) -> ScanRun {
        let entries: Vec<_> = dedup
            .entries()
            .map(|(id, at)| (id.to_string(), at))
            .collect();
        if let Err(e) = self.store.replace_processed_ids(&entries).await {
            error!(error = %e, "Failed to persist processed ids");
            run.errors.push(format!("persisting processed ids: {e}"));
            run.status = ScanStatus::Failed;
        }
        self.finish(run).await
    }

    /// Record the run and send notifications. A run whose outcome cannot be
    /// persisted is surfaced as failed; notification failures are logged
    /// only.
    async fn finish(&self, mut run: ScanRun) -> ScanRun {
        run.finished_at = Some(Utc::now());

        if let Err(e) = self.store.save_scan_run(&run).await {
            error!(error = %e, "Failed to persist scan run");
            run.errors.push(format!("persisting scan run: {e}"));
            run.status = ScanStatus::Failed;
        }

        info!(
            run_id = %run.id,
            status = run.status.as_str(),
            topics = run.topics.len(),
            fetched = run.counters.fetched,
            "Scan run finished"
        );

        let should_notify = (self.notify.on_topics && !run.topics.is_empty())
            || (self.notify.on_errors && run.status == ScanStatus::Failed);
        if should_notify {
            let summary = ScanSummary::from_run(&run);
            let sends = self.notifiers.iter().map(|n| async {
                if let Err(e) = n.notify(&summary).await {
                    warn!(notifier = n.name(), error = %e, "Notification failed");
                }
            });
            futures::future::join_all(sends).await;
        }

        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names() {
        assert_eq!(Stage::Fetching.as_str(), "fetching");
        assert_eq!(Stage::Generating.as_str(), "generating");
    }
}
