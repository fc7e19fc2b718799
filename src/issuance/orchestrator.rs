//! ACME account and order lifecycle.
//!
//! `Uninitialized -> AccountReady -> OrderCreated -> AuthorizationsFetched ->
//! (DNS published externally) -> ValidationPolling -> OrderValid -> Finalizing -> Issued`
//!
//! Any failed step moves the orchestrator to `Failed`; only `create_account`
//! or `load_account` leaves that state. Every remote call is raced against its
//! own budget from [`AcmeTimeouts`](crate::config::AcmeTimeouts) and none is
//! retried here.

use std::sync::Arc;

use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, Authorization, ChallengeType, Identifier, NewAccount, NewOrder, Order,
    OrderStatus, RevocationRequest,
};
use log::{debug, error, info, warn};
use rustls_pki_types::CertificateDer;
use zeroize::Zeroizing;

use super::{
    csr::{csr_der_from_pem, generate_csr},
    dns::{self, DnsRecordInstruction},
    types::{
        AccountRecord, AcmeError, AuthorizationDiagnostic, CertificateOrder, ChallengeRecord,
        ChallengeStatus, IssuedCertificate, OrchestratorState, RevocationReason, acme_failure,
        deadline_failure, read_account_id,
    },
};
use crate::{
    config::{AcmeTimeouts, EngineConfig},
    deadline,
    domain::{normalize_domain, normalize_domain_set},
    storage::{AccountKey, AccountStore},
};

struct Session {
    account: Account,
    record: AccountRecord,
}

pub struct AcmeOrchestrator {
    config: EngineConfig,
    store: Arc<dyn AccountStore>,
    connection_id: String,
    provider: String,
    state: OrchestratorState,
    session: Option<Session>,
}

impl AcmeOrchestrator {
    /// Accounts are persisted under `(connection_id, domain, provider)`; the
    /// provider defaults to `letsencrypt-<staging|prod>`.
    pub fn new(config: EngineConfig, store: Arc<dyn AccountStore>, connection_id: impl Into<String>) -> Self {
        let provider = format!("letsencrypt-{}", config.environment.store_dir());
        Self {
            config,
            store,
            connection_id: connection_id.into(),
            provider,
            state: OrchestratorState::Uninitialized,
            session: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    pub fn account(&self) -> Option<&AccountRecord> {
        self.session.as_ref().map(|session| &session.record)
    }

    fn account_key(&self, domain: &str) -> AccountKey {
        AccountKey::new(self.connection_id.clone(), domain, self.provider.clone())
    }

    fn fail(&mut self, err: AcmeError) -> AcmeError {
        error!("[acme] {} failed in state {:?}: {}", self.connection_id, self.state, err);
        self.state = OrchestratorState::Failed(err.to_string());
        err
    }

    fn settle<T>(&mut self, result: Result<T, AcmeError>) -> Result<T, AcmeError> {
        result.map_err(|err| self.fail(err))
    }

    /// Registers a new account with the configured directory and persists it.
    pub async fn create_account(&mut self, email: &str, domain: &str) -> Result<AccountRecord, AcmeError> {
        let result = self.try_create_account(email, domain).await;
        self.settle(result)
    }

    async fn try_create_account(&mut self, email: &str, domain: &str) -> Result<AccountRecord, AcmeError> {
        let domain = normalize_domain(domain).map_err(|e| AcmeError::InvalidRequest(e.to_string()))?;
        let directory_url = self.config.directory_url().to_string();
        let scope = [domain.clone()];
        info!("[acme] registering account for {} at {}", domain, directory_url);

        let contact = (!email.trim().is_empty()).then(|| format!("mailto:{}", email.trim()));
        let contact_refs: Vec<&str> = contact.iter().map(String::as_str).collect();
        let new_account = NewAccount {
            contact: &contact_refs,
            terms_of_service_agreed: true,
            only_return_existing: false,
        };

        let step = "create account";
        let (account, credentials) = deadline::race(
            step,
            self.config.acme.account,
            Account::create(&new_account, &directory_url, None),
        )
        .await
        .map_err(|e| deadline_failure(e, &scope))?
        .map_err(|e| acme_failure(step, &scope, e))?;

        let credentials = Zeroizing::new(
            serde_json::to_string(&credentials)
                .map_err(|e| AcmeError::CorruptAccount(format!("failed to serialize credentials: {e}")))?,
        );
        let record = AccountRecord {
            email: email.trim().to_string(),
            directory_url,
            account_url: read_account_id(&credentials)?,
            domain: domain.clone(),
            connection_id: self.connection_id.clone(),
            credentials,
        };

        self.store.save(&self.account_key(&domain), &record.to_blob()?)?;
        info!("[acme] account {} ready for {}", record.account_url, domain);

        self.session = Some(Session {
            account,
            record: record.clone(),
        });
        self.state = OrchestratorState::AccountReady;
        Ok(record)
    }

    /// Restores a persisted account. `Ok(None)` when nothing was saved for `domain`.
    pub async fn load_account(&mut self, domain: &str) -> Result<Option<AccountRecord>, AcmeError> {
        let result = self.try_load_account(domain).await;
        self.settle(result)
    }

    async fn try_load_account(&mut self, domain: &str) -> Result<Option<AccountRecord>, AcmeError> {
        let domain = normalize_domain(domain).map_err(|e| AcmeError::InvalidRequest(e.to_string()))?;
        let Some(blob) = self.store.load(&self.account_key(&domain))? else {
            debug!("[acme] no persisted account for {} ({})", domain, self.connection_id);
            return Ok(None);
        };

        let record = AccountRecord::from_blob(&blob)?;
        if record.directory_url != self.config.directory_url() {
            warn!(
                "[acme] persisted account for {} targets {}, configured directory is {}",
                domain,
                record.directory_url,
                self.config.directory_url()
            );
        }
        let credentials: AccountCredentials = serde_json::from_str(&record.credentials)
            .map_err(|e| AcmeError::CorruptAccount(format!("failed to parse credentials: {e}")))?;

        let step = "restore account";
        let scope = [domain.clone()];
        let account = deadline::race(step, self.config.acme.account, Account::from_credentials(credentials))
            .await
            .map_err(|e| deadline_failure(e, &scope))?
            .map_err(|e| acme_failure(step, &scope, e))?;

        info!("[acme] restored account {} for {}", record.account_url, domain);
        self.session = Some(Session {
            account,
            record: record.clone(),
        });
        self.state = OrchestratorState::AccountReady;
        Ok(Some(record))
    }

    /// Creates an order for `domains` and collects one DNS-01 challenge per
    /// domain. Without a `csr`, a key pair and CSR are generated.
    pub async fn request_certificate(
        &mut self,
        csr: Option<&str>,
        domains: &[String],
    ) -> Result<CertificateOrder, AcmeError> {
        self.ensure_usable()?;
        let result = self.try_request_certificate(csr, domains).await;
        self.settle(result)
    }

    fn ensure_usable(&self) -> Result<&Account, AcmeError> {
        if let OrchestratorState::Failed(reason) = &self.state {
            return Err(AcmeError::InvalidRequest(format!(
                "orchestrator failed earlier ({reason}); create or load the account again"
            )));
        }
        self.session
            .as_ref()
            .map(|session| &session.account)
            .ok_or(AcmeError::NoAccount)
    }

    async fn try_request_certificate(
        &mut self,
        csr: Option<&str>,
        domains: &[String],
    ) -> Result<CertificateOrder, AcmeError> {
        let domains = normalize_domain_set(domains).map_err(|e| AcmeError::InvalidRequest(e.to_string()))?;
        let (csr_pem, private_key_pem) = match csr {
            Some(pem) => (pem.to_string(), None),
            None => {
                let generated = generate_csr(&domains)?;
                (generated.csr_pem, Some(generated.private_key_pem))
            }
        };
        let csr_der = csr_der_from_pem(&csr_pem)?;

        let account = self.ensure_usable()?;
        let identifiers: Vec<Identifier> = domains.iter().map(|d| Identifier::Dns(d.clone())).collect();
        info!("[acme] creating order for [{}]", domains.join(", "));

        let step = "create order";
        let mut order = deadline::race(
            step,
            self.config.acme.order,
            account.new_order(&NewOrder {
                identifiers: &identifiers,
            }),
        )
        .await
        .map_err(|e| deadline_failure(e, &domains))?
        .map_err(|e| acme_failure(step, &domains, e))?;
        self.state = OrchestratorState::OrderCreated;

        let step = "fetch authorizations";
        let authorizations = deadline::race(step, self.config.acme.authorizations, order.authorizations())
            .await
            .map_err(|e| deadline_failure(e, &domains))?
            .map_err(|e| acme_failure(step, &domains, e))?;

        let offers = authorizations
            .iter()
            .map(|authz| {
                let Identifier::Dns(domain) = &authz.identifier;
                Offer {
                    domain: domain.clone(),
                    dns01: authz.challenges.iter().find(|c| c.r#type == ChallengeType::Dns01),
                }
            })
            .collect();
        let challenges = require_dns01(&domains, offers)?
            .into_iter()
            .map(|(domain, challenge)| ChallengeRecord {
                url: challenge.url.clone(),
                token: challenge.token.clone(),
                status: ChallengeStatus::from_debug(&challenge.status),
                key_authorization: order.key_authorization(challenge).as_str().to_string(),
                domain,
            })
            .collect::<Vec<_>>();

        debug!("[acme] order {} has {} dns-01 challenges", order.url(), challenges.len());
        self.state = OrchestratorState::AuthorizationsFetched;
        Ok(CertificateOrder {
            url: order.url().to_string(),
            order,
            domains,
            csr_pem,
            csr_der,
            private_key_pem,
            challenges,
        })
    }

    /// TXT value to publish for `challenge`. Pure; no network access.
    pub fn dns_record_value(challenge: &ChallengeRecord) -> String {
        dns::dns_record_value(&challenge.key_authorization)
    }

    pub fn dns_record_instruction(challenge: &ChallengeRecord) -> DnsRecordInstruction {
        DnsRecordInstruction::new(&challenge.domain, &challenge.key_authorization)
    }

    /// Tells the server `challenge` is ready for validation. Does not wait
    /// for the validation result.
    pub async fn complete_challenge(
        &mut self,
        order: &mut CertificateOrder,
        challenge: &ChallengeRecord,
    ) -> Result<(), AcmeError> {
        self.ensure_usable()?;
        let step = "signal challenge ready";
        let scope = [challenge.domain.clone()];
        debug!("[acme] {} for {}", step, challenge.domain);
        let result = match deadline::race(
            step,
            self.config.acme.challenge_ready,
            order.order.set_challenge_ready(&challenge.url),
        )
        .await
        {
            Ok(outcome) => outcome.map_err(|e| acme_failure(step, &scope, e)),
            Err(elapsed) => Err(deadline_failure(elapsed, &scope)),
        };
        self.settle(result)
    }

    /// Signals every challenge of `order`, in domain order.
    pub async fn complete_all_challenges(&mut self, order: &mut CertificateOrder) -> Result<(), AcmeError> {
        for challenge in order.challenges.clone() {
            self.complete_challenge(order, &challenge).await?;
        }
        Ok(())
    }

    /// Waits for the order to become ready for finalization (or already valid).
    ///
    /// On failure or timeout the authorizations are fetched once more and
    /// attached to the error. That fetch is best effort and never replaces the
    /// original error.
    pub async fn wait_for_order_completion(&mut self, order: &mut CertificateOrder) -> Result<(), AcmeError> {
        self.ensure_usable()?;
        self.state = OrchestratorState::ValidationPolling;
        let timeouts = self.config.acme.clone();
        match await_validation(&mut order.order, &timeouts, &order.url, &order.domains).await {
            Ok(status) => {
                info!("[acme] order {} is {:?}", order.url, status);
                self.state = OrchestratorState::OrderValid;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Submits the CSR (the order's own unless `csr` overrides it) and
    /// downloads the issued chain.
    pub async fn finalize_certificate(
        &mut self,
        order: &mut CertificateOrder,
        csr: Option<&str>,
    ) -> Result<IssuedCertificate, AcmeError> {
        self.ensure_usable()?;
        let result = self.try_finalize(order, csr).await;
        self.settle(result)
    }

    async fn try_finalize(
        &mut self,
        order: &mut CertificateOrder,
        csr: Option<&str>,
    ) -> Result<IssuedCertificate, AcmeError> {
        let overridden = match csr {
            Some(pem) => Some(csr_der_from_pem(pem)?),
            None => None,
        };
        let csr_der = overridden.as_deref().unwrap_or(&order.csr_der);
        let domains = order.domains.clone();
        self.state = OrchestratorState::Finalizing;

        if order.order.state().status == OrderStatus::Valid {
            debug!("[acme] order {} already valid; skipping finalize", order.url);
        } else {
            let step = "finalize order";
            deadline::race(step, self.config.acme.finalize, order.order.finalize(csr_der))
                .await
                .map_err(|e| deadline_failure(e, &domains))?
                .map_err(|e| acme_failure(step, &domains, e))?;
        }

        let step = "download certificate";
        let poll_interval = self.config.acme.poll_interval;
        let certificate_pem = deadline::race(step, self.config.acme.download, async {
            loop {
                match order.order.certificate().await {
                    Ok(Some(chain)) => return Ok(chain),
                    Ok(None) => {
                        debug!("[acme] certificate for {} not ready yet", order.url);
                        tokio::time::sleep(poll_interval).await;
                    }
                    Err(e) => return Err(acme_failure(step, &domains, e)),
                }
            }
        })
        .await
        .map_err(|e| deadline_failure(e, &domains))??;

        info!("[acme] issued certificate for [{}]", domains.join(", "));
        self.state = OrchestratorState::Issued;
        Ok(IssuedCertificate {
            certificate_pem,
            private_key_pem: if overridden.is_some() {
                None
            } else {
                order.private_key_pem.clone()
            },
        })
    }

    /// Best-effort revocation of the first certificate in `certificate_pem`.
    /// Failures are reported, not retried, and leave the state unchanged.
    pub async fn revoke_certificate(
        &self,
        certificate_pem: &str,
        reason: Option<RevocationReason>,
    ) -> Result<(), AcmeError> {
        let account = self.ensure_usable()?;
        let block = pem::parse(certificate_pem)
            .map_err(|e| AcmeError::InvalidRequest(format!("invalid certificate PEM: {e}")))?;
        if block.tag() != "CERTIFICATE" {
            return Err(AcmeError::InvalidRequest(format!(
                "expected a certificate, found {}",
                block.tag()
            )));
        }
        let der = CertificateDer::from(block.into_contents());

        let step = "revoke certificate";
        deadline::race(
            step,
            self.config.acme.revoke,
            account.revoke(&RevocationRequest {
                certificate: &der,
                reason,
            }),
        )
        .await
        .map_err(|e| deadline_failure(e, &[]))?
        .map_err(|e| acme_failure(step, &[], e))?;
        info!("[acme] certificate revoked");
        Ok(())
    }
}

/// The part of an ACME order the validation wait drives.
#[async_trait]
pub(crate) trait OrderProgress: Send {
    /// Refetches the order: its status and the server's problem detail, if any.
    async fn poll_status(&mut self) -> Result<(OrderStatus, Option<String>), instant_acme::Error>;

    async fn authorization_diagnostics(&mut self) -> Result<Vec<AuthorizationDiagnostic>, instant_acme::Error>;
}

#[async_trait]
impl OrderProgress for Order {
    async fn poll_status(&mut self) -> Result<(OrderStatus, Option<String>), instant_acme::Error> {
        let state = self.refresh().await?;
        Ok((state.status, state.error.as_ref().map(|problem| problem.to_string())))
    }

    async fn authorization_diagnostics(&mut self) -> Result<Vec<AuthorizationDiagnostic>, instant_acme::Error> {
        // A refresh failure still leaves the authorizations worth fetching.
        if let Err(err) = self.refresh().await {
            debug!("[acme] diagnostic order refresh failed: {}", err);
        }
        let authorizations = self.authorizations().await?;
        Ok(authorizations.iter().map(diagnostic_for).collect())
    }
}

fn diagnostic_for(authz: &Authorization) -> AuthorizationDiagnostic {
    let Identifier::Dns(domain) = &authz.identifier;
    let dns01 = authz.challenges.iter().find(|c| c.r#type == ChallengeType::Dns01);
    AuthorizationDiagnostic {
        domain: domain.clone(),
        status: format!("{:?}", authz.status).to_lowercase(),
        challenge_status: dns01.map(|c| format!("{:?}", c.status).to_lowercase()),
        detail: dns01.and_then(|c| c.error.as_ref().map(|problem| problem.to_string())),
    }
}

/// Settles, then polls `progress` until the order is ready or valid within
/// the validation ceiling. Failures carry whatever diagnostics could be fetched.
pub(crate) async fn await_validation<P: OrderProgress + ?Sized>(
    progress: &mut P,
    timeouts: &AcmeTimeouts,
    url: &str,
    domains: &[String],
) -> Result<OrderStatus, AcmeError> {
    tokio::time::sleep(timeouts.settle_delay).await;

    let step = "wait for validation";
    let polled = deadline::race(step, timeouts.validation, async {
        loop {
            let (status, problem) = match progress.poll_status().await {
                Ok(polled) => polled,
                Err(e) => return Err(acme_failure("refresh order", domains, e)),
            };
            match status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(status),
                OrderStatus::Invalid => {
                    return Err(AcmeError::Validation {
                        reason: problem.unwrap_or_else(|| "order became invalid".to_string()),
                        diagnostics: Vec::new(),
                    });
                }
                OrderStatus::Pending | OrderStatus::Processing => {
                    debug!("[acme] order {} is {:?}; polling", url, status);
                    tokio::time::sleep(timeouts.poll_interval).await;
                }
            }
        }
    })
    .await;

    let err = match polled {
        Ok(Ok(status)) => return Ok(status),
        Ok(Err(err)) => err,
        Err(elapsed) => deadline_failure(elapsed, domains),
    };

    let diagnostics = match deadline::race(
        "collect diagnostics",
        timeouts.authorizations,
        progress.authorization_diagnostics(),
    )
    .await
    {
        Ok(Ok(diagnostics)) => diagnostics,
        Ok(Err(fetch_err)) => {
            warn!("[acme] could not fetch diagnostics for {}: {}", url, fetch_err);
            Vec::new()
        }
        Err(elapsed) => {
            warn!("[acme] diagnostics for {}: {}", url, elapsed);
            Vec::new()
        }
    };
    for diagnostic in &diagnostics {
        warn!(
            "[acme] {} authorization {} (challenge {:?}): {}",
            diagnostic.domain,
            diagnostic.status,
            diagnostic.challenge_status,
            diagnostic.detail.as_deref().unwrap_or("no detail")
        );
    }
    Err(err.with_diagnostics(diagnostics))
}

/// One authorization's domain and its DNS-01 challenge, if offered.
pub(crate) struct Offer<'a, C> {
    pub domain: String,
    pub dns01: Option<&'a C>,
}

/// Pairs every requested domain with its DNS-01 challenge. A single domain
/// without one fails the whole request. Wildcards are authorized on their
/// base name.
pub(crate) fn require_dns01<'a, C>(
    requested: &[String],
    offers: Vec<Offer<'a, C>>,
) -> Result<Vec<(String, &'a C)>, AcmeError> {
    let mut selected = Vec::with_capacity(requested.len());
    for domain in requested {
        let base = domain.strip_prefix("*.").unwrap_or(domain);
        let offer = offers
            .iter()
            .find(|offer| offer.domain == base)
            .ok_or_else(|| AcmeError::MissingDns01 { domain: domain.clone() })?;
        let challenge = offer
            .dns01
            .ok_or_else(|| AcmeError::MissingDns01 { domain: domain.clone() })?;
        selected.push((domain.clone(), challenge));
    }
    Ok(selected)
}
