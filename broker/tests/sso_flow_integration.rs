//! Integration tests for the login → access → validate → logout flow,
//! including proxy delegation and expiration.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;
use ticket_broker::services::{
    AttributeReleasePolicy, RegisteredService, ServicePattern, ServicesManager,
};
use ticket_broker::stores::{InMemoryServiceRegistryDao, InMemoryTicketRegistry, JsonServiceRegistryDao};
use ticket_broker::{
    BrokerConfig, BrokerEnvironment, BrokerError, Principal, ServiceRegistryDao, TicketBroker,
    TicketKind, TicketRegistry,
};
use ticket_broker_testing::{ManualClock, init_tracing};

type TestBroker = TicketBroker<InMemoryTicketRegistry, InMemoryServiceRegistryDao>;

const PORTAL: &str = "https://portal.example.org/";
const MAIL: &str = "https://mail.example.org/inbox";
const BACKEND: &str = "https://api.example.org/v1";

/// Broker over in-memory stores with three services:
/// - portal (exact, may proxy, releases only `mail`)
/// - mail (wildcard, may proxy)
/// - backend (regex, may not proxy)
async fn create_test_broker(config: BrokerConfig) -> (TestBroker, ManualClock) {
    init_tracing();
    let clock = ManualClock::default();
    let services = ServicesManager::new(InMemoryServiceRegistryDao::new());
    services
        .save(
            RegisteredService::new("portal", ServicePattern::exact(PORTAL))
                .with_proxy(true)
                .with_attribute_release(AttributeReleasePolicy::ReturnAllowed(
                    ["mail".to_string()].into_iter().collect(),
                )),
        )
        .await
        .unwrap();
    services
        .save(
            RegisteredService::new("mail", ServicePattern::wildcard("https://mail.example.org/*").unwrap())
                .with_proxy(true),
        )
        .await
        .unwrap();
    services
        .save(RegisteredService::new(
            "backend",
            ServicePattern::regex(r"^https://api\.example\.org/").unwrap(),
        ))
        .await
        .unwrap();

    let env = BrokerEnvironment::new(
        Arc::new(InMemoryTicketRegistry::new(Arc::new(clock.clone()))),
        Arc::new(services),
        Arc::new(clock.clone()),
    );
    (TicketBroker::new(env, config).unwrap(), clock)
}

fn casuser() -> Principal {
    Principal::new("casuser")
        .with_attribute("mail", "casuser@example.org")
        .with_attribute("memberOf", "staff")
}

#[tokio::test]
async fn test_login_access_validate_logout() {
    let (broker, _clock) = create_test_broker(BrokerConfig::default()).await;

    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();
    assert_eq!(tgt.kind, TicketKind::TicketGranting);
    assert!(tgt.id.as_str().starts_with("TGT-"));
    assert!(tgt.parent.is_none());

    let st = broker.issue_service_ticket(&tgt.id, MAIL).await.unwrap();
    assert_eq!(st.kind, TicketKind::Service);
    assert_eq!(st.parent.as_ref(), Some(&tgt.id));
    assert_eq!(st.service().unwrap().url, MAIL);

    let assertion = broker.validate_service_ticket(&st.id, MAIL).await.unwrap();
    assert_eq!(assertion.principal, casuser());
    assert_eq!(assertion.service.name, "mail");
    assert!(assertion.proxy_chain.is_empty());

    assert_eq!(broker.destroy_session(&tgt.id).await.unwrap(), 1);
    assert!(matches!(
        broker.issue_service_ticket(&tgt.id, MAIL).await,
        Err(BrokerError::TicketExpired(_))
    ));
    assert_eq!(broker.destroy_session(&tgt.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_service_ticket_is_single_use() {
    let (broker, _clock) = create_test_broker(BrokerConfig::default()).await;
    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();
    let st = broker.issue_service_ticket(&tgt.id, PORTAL).await.unwrap();

    broker.validate_service_ticket(&st.id, PORTAL).await.unwrap();
    assert!(matches!(
        broker.validate_service_ticket(&st.id, PORTAL).await,
        Err(BrokerError::TicketNotFound(_))
    ));
}

#[tokio::test]
async fn test_attribute_release_filters_principal() {
    let (broker, _clock) = create_test_broker(BrokerConfig::default()).await;
    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();
    let st = broker.issue_service_ticket(&tgt.id, PORTAL).await.unwrap();

    let assertion = broker.validate_service_ticket(&st.id, PORTAL).await.unwrap();
    assert_eq!(assertion.principal.id, "casuser");
    assert_eq!(
        assertion.principal.attributes.keys().collect::<Vec<_>>(),
        vec!["mail"]
    );
}

#[tokio::test]
async fn test_unregistered_service_is_refused() {
    let (broker, _clock) = create_test_broker(BrokerConfig::default()).await;
    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();

    let err = broker
        .issue_service_ticket(&tgt.id, "https://evil.example.com/")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BrokerError::UnauthorizedService("https://evil.example.com/".to_string())
    );
}

#[tokio::test]
async fn test_disabled_service_is_refused() {
    let (broker, _clock) = create_test_broker(BrokerConfig::default()).await;
    let services = &broker.environment().services;
    let mail = services.matches(MAIL).unwrap();
    services.save(mail.with_enabled(false)).await.unwrap();

    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();
    assert!(matches!(
        broker.issue_service_ticket(&tgt.id, MAIL).await,
        Err(BrokerError::UnauthorizedService(_))
    ));
}

#[tokio::test]
async fn test_service_disabled_after_issue_fails_validation() {
    let (broker, _clock) = create_test_broker(BrokerConfig::default()).await;
    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();
    let st = broker.issue_service_ticket(&tgt.id, MAIL).await.unwrap();

    let services = &broker.environment().services;
    let mail = services.matches(MAIL).unwrap();
    services.save(mail.with_enabled(false)).await.unwrap();

    assert!(matches!(
        broker.validate_service_ticket(&st.id, MAIL).await,
        Err(BrokerError::UnauthorizedService(_))
    ));
}

#[tokio::test]
async fn test_highest_precedence_service_is_bound() {
    let (broker, _clock) = create_test_broker(BrokerConfig::default()).await;
    let services = &broker.environment().services;
    services
        .save(
            RegisteredService::new("A", ServicePattern::regex("^serviceId").unwrap())
                .with_id(1000)
                .with_evaluation_order(1000),
        )
        .await
        .unwrap();
    services
        .save(
            RegisteredService::new("B", ServicePattern::regex("^serviceId").unwrap())
                .with_id(2000)
                .with_evaluation_order(100),
        )
        .await
        .unwrap();

    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();
    let st = broker.issue_service_ticket(&tgt.id, "serviceId").await.unwrap();
    assert_eq!(st.service().unwrap().registered_service_id, 2000);

    let assertion = broker.validate_service_ticket(&st.id, "serviceId").await.unwrap();
    assert_eq!(assertion.service.name, "B");
}

#[tokio::test]
async fn test_single_service_scenario_consumes_once() {
    let (broker, _clock) = create_test_broker(BrokerConfig::default()).await;
    broker
        .environment()
        .services
        .save(
            RegisteredService::new("A", ServicePattern::regex("^serviceId").unwrap())
                .with_id(1000)
                .with_evaluation_order(1000),
        )
        .await
        .unwrap();

    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();
    let st = broker.issue_service_ticket(&tgt.id, "serviceId").await.unwrap();

    let tickets = &broker.environment().tickets;
    assert_eq!(tickets.consume_single_use(&st.id).await.unwrap().id, st.id);
    assert_eq!(
        tickets.consume_single_use(&st.id).await.unwrap_err(),
        BrokerError::TicketNotFound(st.id.to_string())
    );
}

#[tokio::test]
async fn test_proxy_delegation_chain() {
    let (broker, _clock) = create_test_broker(BrokerConfig::default()).await;
    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();

    // Portal validates its ST and receives a PGT.
    let st = broker.issue_service_ticket(&tgt.id, PORTAL).await.unwrap();
    let grant = broker.issue_proxy_granting_ticket(&st.id, PORTAL).await.unwrap();
    let pgt = grant.proxy_granting_ticket;
    assert_eq!(pgt.kind, TicketKind::ProxyGranting);
    assert_eq!(pgt.parent.as_ref(), Some(&tgt.id));
    assert_eq!(pgt.proxied_by().unwrap().url, PORTAL);
    assert_eq!(pgt.principal().unwrap(), &casuser());

    // Portal calls mail on the user's behalf.
    let pt = broker.issue_proxy_ticket(&pgt.id, MAIL).await.unwrap();
    assert_eq!(pt.kind, TicketKind::Proxy);
    assert_eq!(pt.parent.as_ref(), Some(&pgt.id));

    // Mail validates the PT and proxies further to the backend.
    let grant = broker.issue_proxy_granting_ticket(&pt.id, MAIL).await.unwrap();
    assert_eq!(grant.assertion.proxy_chain, vec![PORTAL.to_string()]);
    let pgt2 = grant.proxy_granting_ticket;
    assert_eq!(pgt2.parent.as_ref(), Some(&pgt.id));

    let pt2 = broker.issue_proxy_ticket(&pgt2.id, BACKEND).await.unwrap();
    let assertion = broker.validate_proxy_ticket(&pt2.id, BACKEND).await.unwrap();
    assert_eq!(assertion.principal.id, "casuser");
    assert_eq!(
        assertion.proxy_chain,
        vec![MAIL.to_string(), PORTAL.to_string()]
    );
}

#[tokio::test]
async fn test_proxy_ticket_rejected_by_service_ticket_validation() {
    let (broker, _clock) = create_test_broker(BrokerConfig::default()).await;
    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();
    let st = broker.issue_service_ticket(&tgt.id, PORTAL).await.unwrap();
    let pgt = broker
        .issue_proxy_granting_ticket(&st.id, PORTAL)
        .await
        .unwrap()
        .proxy_granting_ticket;
    let pt = broker.issue_proxy_ticket(&pgt.id, MAIL).await.unwrap();

    assert!(matches!(
        broker.validate_service_ticket(&pt.id, MAIL).await,
        Err(BrokerError::InvalidTicketKind { .. })
    ));
    // Rejected by kind before any state change.
    assert!(broker.validate_proxy_ticket(&pt.id, MAIL).await.is_ok());
}

#[tokio::test]
async fn test_service_without_proxy_rights_gets_no_pgt() {
    let (broker, _clock) = create_test_broker(BrokerConfig::default()).await;
    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();
    let st = broker.issue_service_ticket(&tgt.id, BACKEND).await.unwrap();

    assert_eq!(
        broker
            .issue_proxy_granting_ticket(&st.id, BACKEND)
            .await
            .unwrap_err(),
        BrokerError::UnauthorizedProxy(BACKEND.to_string())
    );
}

#[tokio::test]
async fn test_logout_cascades_through_proxy_tickets() {
    let (broker, _clock) = create_test_broker(BrokerConfig::default()).await;
    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();
    let unused_st = broker.issue_service_ticket(&tgt.id, MAIL).await.unwrap();
    let st = broker.issue_service_ticket(&tgt.id, PORTAL).await.unwrap();
    let pgt = broker
        .issue_proxy_granting_ticket(&st.id, PORTAL)
        .await
        .unwrap()
        .proxy_granting_ticket;
    let pt = broker.issue_proxy_ticket(&pgt.id, MAIL).await.unwrap();

    // TGT, unused ST, PGT, PT (the portal ST was consumed).
    assert_eq!(broker.destroy_session(&tgt.id).await.unwrap(), 4);

    let tickets = &broker.environment().tickets;
    for id in [&unused_st.id, &pt.id] {
        assert!(matches!(
            tickets.consume_single_use(id).await,
            Err(BrokerError::TicketNotFound(_))
        ));
    }
    assert!(tickets.get_ticket(&pgt.id).await.unwrap().is_none());
    assert!(matches!(
        broker.issue_proxy_ticket(&pgt.id, MAIL).await,
        Err(BrokerError::TicketExpired(_))
    ));
}

#[tokio::test]
async fn test_idle_timeout_ends_session() {
    let config = BrokerConfig::default()
        .with_tgt_lifetime(Duration::from_secs(3600), Duration::from_secs(300));
    let (broker, clock) = create_test_broker(config).await;
    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();

    clock.advance(Duration::from_secs(301));

    assert!(matches!(
        broker.issue_service_ticket(&tgt.id, MAIL).await,
        Err(BrokerError::TicketExpired(_))
    ));
}

#[tokio::test]
async fn test_max_lifetime_ends_active_session() {
    let config = BrokerConfig::default()
        .with_tgt_lifetime(Duration::from_secs(3600), Duration::from_secs(300));
    let (broker, clock) = create_test_broker(config).await;
    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();

    // Activity every 4 minutes keeps the idle window open for the hour.
    for _ in 0..15 {
        clock.advance(Duration::from_secs(240));
        broker.issue_service_ticket(&tgt.id, MAIL).await.unwrap();
    }

    clock.advance(Duration::from_secs(1));
    assert!(matches!(
        broker.issue_service_ticket(&tgt.id, MAIL).await,
        Err(BrokerError::TicketExpired(_))
    ));
}

#[tokio::test]
async fn test_expired_service_ticket_is_refused() {
    let (broker, clock) = create_test_broker(BrokerConfig::default()).await;
    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();
    let st = broker.issue_service_ticket(&tgt.id, MAIL).await.unwrap();

    clock.advance(Duration::from_secs(11));

    assert_eq!(
        broker.validate_service_ticket(&st.id, MAIL).await.unwrap_err(),
        BrokerError::TicketExpired(st.id.to_string())
    );
}

#[tokio::test]
async fn test_services_loaded_from_json_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("services.json");
    let dao = JsonServiceRegistryDao::new(&path);
    dao.save(
        &RegisteredService::new("mail", ServicePattern::wildcard("https://mail.example.org/*").unwrap())
            .with_id(7),
    )
    .await
    .unwrap();

    let clock = ManualClock::default();
    let env = BrokerEnvironment::new(
        Arc::new(InMemoryTicketRegistry::new(Arc::new(clock.clone()))),
        Arc::new(ServicesManager::load(JsonServiceRegistryDao::new(&path)).await.unwrap()),
        Arc::new(clock),
    );
    let broker = TicketBroker::new(env, BrokerConfig::default()).unwrap();

    let tgt = broker.issue_ticket_granting_ticket(casuser()).await.unwrap();
    let st = broker.issue_service_ticket(&tgt.id, MAIL).await.unwrap();
    assert_eq!(st.service().unwrap().registered_service_id, 7);
}
