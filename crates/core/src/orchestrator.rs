//! Request orchestration: account selection, flow dispatch and entity
//! emission.
//!
//! Extraction runs on a spawned task that feeds a bounded channel, so the
//! response body pulls entities at the pace the client reads them.

use std::ops::ControlFlow;
use std::sync::Arc;

use futures::TryStreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use survey_proxy_common::{AppError, AppResult, Config};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::accounts::{Account, AccountRegistry};
use crate::args::{ApiArgs, ServiceArgs};
use crate::blacklist::Blacklist;
use crate::entity::Entity;
use crate::governor::{Governor, RejectionState};
use crate::normalizer::sesamify;
use crate::paginator::Paginator;
use crate::upstream::{UpstreamClient, UpstreamSession};

/// Logical path that triggers the survey reporting flow.
pub const COMPOSITE_PATH: &str = "minimalreportingdata";

const CHANNEL_CAPACITY: usize = 64;

/// One inbound extraction request.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    /// Logical upstream path, relative to the base URL.
    pub path: String,
    /// Reserved parameters steering the extraction.
    pub service_args: ServiceArgs,
    /// Parameters forwarded upstream.
    pub api_args: ApiArgs,
}

/// Runs extraction requests against the upstream API.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    client: UpstreamClient,
    governor: Governor,
    accounts: AccountRegistry,
    blacklist: Arc<Blacklist>,
}

impl Orchestrator {
    /// Assemble an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        client: UpstreamClient,
        governor: Governor,
        accounts: AccountRegistry,
        blacklist: Blacklist,
    ) -> Self {
        Self {
            client,
            governor,
            accounts,
            blacklist: Arc::new(blacklist),
        }
    }

    /// Build the orchestrator and its collaborators from configuration.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        Ok(Self::new(
            UpstreamClient::new(&config.upstream)?,
            Governor::from_thresholds(RejectionState::new(), &config.thresholds),
            AccountRegistry::new(config.accounts.clone()),
            Blacklist::new(&config.blacklist)?,
        ))
    }

    /// The governor shared by every request.
    #[must_use]
    pub const fn governor(&self) -> &Governor {
        &self.governor
    }

    /// Start a request. Rejection and account selection are checked before
    /// anything is fetched; later failures arrive through the stream.
    pub async fn start(
        &self,
        request: ExtractRequest,
    ) -> AppResult<ReceiverStream<AppResult<Entity>>> {
        self.governor.pre_check().await?;
        let accounts = self.accounts.resolve(&request.service_args.account_keys)?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let span = info_span!("extract", path = %request.path);
        let this = self.clone();
        tokio::spawn(async move { this.produce(accounts, request, tx).await }.instrument(span));

        Ok(ReceiverStream::new(rx))
    }

    async fn produce(
        self,
        accounts: Vec<Account>,
        request: ExtractRequest,
        tx: mpsc::Sender<AppResult<Entity>>,
    ) {
        let ExtractRequest {
            path,
            mut service_args,
            api_args,
        } = request;
        let mut sink = EntitySink::new(tx, service_args.limit);
        if sink.is_full() {
            return;
        }

        for account in accounts {
            let session = self.client.session(&account);
            info!(account = %session.account_key(), "Extracting");

            let flow = if path == COMPOSITE_PATH {
                self.composite(&session, &mut service_args, &api_args, &mut sink)
                    .await
            } else {
                self.simple(&session, &path, &mut service_args, &api_args, &mut sink)
                    .await
            };

            match flow {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => return,
                Err(err) => {
                    sink.fail(err).await;
                    return;
                }
            }
        }

        debug!(emitted = sink.emitted, "Extraction complete");
    }

    async fn simple(
        &self,
        session: &UpstreamSession,
        path: &str,
        service_args: &mut ServiceArgs,
        api_args: &ApiArgs,
        sink: &mut EntitySink,
    ) -> AppResult<ControlFlow<()>> {
        let entities = Paginator::new(
            session,
            &self.governor,
            self.client.url_for(path),
            api_args.clone(),
            service_args.is_paging_on,
        )
        .into_entities();

        drain(entities, service_args, None, sink).await
    }

    /// Surveys, then per surviving survey its details, collectors and bulk
    /// responses.
    async fn composite(
        &self,
        session: &UpstreamSession,
        service_args: &mut ServiceArgs,
        api_args: &ApiArgs,
        sink: &mut EntitySink,
    ) -> AppResult<ControlFlow<()>> {
        let paging = service_args.is_paging_on;
        let mut surveys = Paginator::new(
            session,
            &self.governor,
            self.client.url_for("surveys"),
            ApiArgs::new(),
            paging,
        )
        .into_entities();

        while let Some(survey) = surveys.try_next().await? {
            let survey_id = survey.get("id").cloned().unwrap_or(Value::Null);

            if let Some(field) = self.blacklist.matching_field(&survey) {
                info!(survey_id = %survey_id, field, "Skipping blacklisted survey");
                continue;
            }

            let Some(href) = survey.get("href").and_then(Value::as_str) else {
                warn!(survey_id = %survey_id, "Survey has no href; skipping");
                continue;
            };
            let href = href.trim_end_matches('/');

            let details = Paginator::new(
                session,
                &self.governor,
                format!("{href}/details"),
                ApiArgs::new().with("include", "date_modified"),
                paging,
            );
            if drain(details.into_entities(), service_args, None, sink)
                .await?
                .is_break()
            {
                return Ok(ControlFlow::Break(()));
            }

            let collectors = Paginator::new(
                session,
                &self.governor,
                format!("{href}/collectors"),
                ApiArgs::new().with("include", "status,date_modified"),
                paging,
            );
            let survey_ref = Entity::from_iter([("survey_id".to_string(), survey_id)]);
            if drain(collectors.into_entities(), service_args, Some(&survey_ref), sink)
                .await?
                .is_break()
            {
                return Ok(ControlFlow::Break(()));
            }

            let responses = Paginator::new(
                session,
                &self.governor,
                format!("{href}/responses/bulk"),
                api_args.clone(),
                paging,
            );
            if drain(responses.into_entities(), service_args, None, sink)
                .await?
                .is_break()
            {
                return Ok(ControlFlow::Break(()));
            }
        }

        Ok(ControlFlow::Continue(()))
    }
}

/// Normalize and emit every entity of one fetch.
async fn drain(
    mut entities: BoxStream<'_, AppResult<Entity>>,
    service_args: &mut ServiceArgs,
    extra: Option<&Entity>,
    sink: &mut EntitySink,
) -> AppResult<ControlFlow<()>> {
    while let Some(entity) = entities.try_next().await? {
        let entity = sesamify(entity, service_args, extra);
        if sink.emit(entity).await.is_break() {
            return Ok(ControlFlow::Break(()));
        }
    }
    Ok(ControlFlow::Continue(()))
}

/// Sending half of a request's entity channel, with the `limit` cap.
struct EntitySink {
    tx: mpsc::Sender<AppResult<Entity>>,
    limit: Option<usize>,
    emitted: usize,
}

impl EntitySink {
    const fn new(tx: mpsc::Sender<AppResult<Entity>>, limit: Option<usize>) -> Self {
        Self {
            tx,
            limit,
            emitted: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.limit.is_some_and(|limit| self.emitted >= limit)
    }

    async fn emit(&mut self, entity: Entity) -> ControlFlow<()> {
        if self.is_full() {
            return ControlFlow::Break(());
        }
        if self.tx.send(Ok(entity)).await.is_err() {
            debug!("Client went away; stopping extraction");
            return ControlFlow::Break(());
        }
        self.emitted += 1;

        if self.is_full() {
            debug!(limit = ?self.limit, "Entity limit reached");
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    async fn fail(&self, err: AppError) {
        if self.tx.send(Err(err)).await.is_err() {
            debug!("Client went away before the error could be delivered");
        }
    }
}
