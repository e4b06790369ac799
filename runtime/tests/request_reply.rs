//! Integration tests for request/reply over the in-memory broker
//!
//! Nodes are wired exactly as in production (publish task, consumer loop,
//! correlation table) with `InMemoryBroker` standing in for Redpanda.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use futures::StreamExt;
use onboarding_rpc_core::broker::MessageBroker;
use onboarding_rpc_core::envelope::{InboundEnvelope, OutboundEnvelope};
use onboarding_rpc_core::operations::{EmployeeProfile, ProfileLookup};
use onboarding_rpc_core::payload::{IntoPayload, Payload};
use onboarding_rpc_runtime::{CallError, DispatchTable, RpcClient, RpcNode};
use onboarding_rpc_testing::{InMemoryBroker, fixtures};
use rand::seq::SliceRandom;
use serde_json::{Value, json};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const CALLER: &str = "onboarding-service";
const RESPONDER: &str = "employee-service";
const TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Fixtures
// ============================================================================

fn directory() -> DispatchTable {
    DispatchTable::new().route("find_employee_by_id", |lookup: ProfileLookup| async move {
        if lookup.employee_id == "E-404" {
            return Err(format!("employee {} not found", lookup.employee_id));
        }
        Ok(EmployeeProfile {
            id: lookup.employee_id,
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            email: "grace@example.com".to_string(),
            department: Some("Engineering".to_string()),
            position: None,
        })
    })
}

async fn pair(broker: &Arc<InMemoryBroker>) -> (RpcNode, RpcNode) {
    let caller = RpcNode::start(broker.clone(), CALLER, DispatchTable::new(), 64)
        .await
        .unwrap();
    let responder = RpcNode::start(broker.clone(), RESPONDER, directory(), 64)
        .await
        .unwrap();
    (caller, responder)
}

fn lookup(id: &str) -> ProfileLookup {
    ProfileLookup {
        employee_id: id.to_string(),
    }
}

// ============================================================================
// Round trips
// ============================================================================

#[tokio::test]
async fn typed_call_round_trips_between_nodes() {
    onboarding_rpc_testing::init_tracing();
    let broker = Arc::new(InMemoryBroker::new());
    let (caller, responder) = pair(&broker).await;

    let profile: EmployeeProfile = caller
        .client()
        .call_typed(RESPONDER, "find_employee_by_id", lookup("E-1"), TIMEOUT)
        .await
        .unwrap();

    assert_eq!(profile.id, "E-1");
    assert_eq!(profile.full_name(), "Grace Hopper");
    assert_eq!(caller.pending_calls(), 0);
    // Request consumed by the responder, reply consumed by the caller.
    assert_eq!(broker.acked(RESPONDER), 1);
    assert_eq!(broker.acked(CALLER), 1);

    caller.shutdown(TIMEOUT).await;
    responder.shutdown(TIMEOUT).await;
}

#[tokio::test]
async fn handler_failure_surfaces_as_remote_error() {
    let broker = Arc::new(InMemoryBroker::new());
    let (caller, _responder) = pair(&broker).await;

    let err = caller
        .client()
        .call_typed::<_, EmployeeProfile>(
            RESPONDER,
            "find_employee_by_id",
            lookup("E-404"),
            TIMEOUT,
        )
        .await
        .unwrap_err();

    assert_eq!(err, CallError::Remote("employee E-404 not found".to_string()));
}

#[tokio::test]
async fn missing_field_surfaces_as_remote_error() {
    let broker = Arc::new(InMemoryBroker::new());
    let (caller, _responder) = pair(&broker).await;

    let err = caller
        .client()
        .call(RESPONDER, "find_employee_by_id", Payload::new(), TIMEOUT)
        .await
        .unwrap_err();

    assert_eq!(err, CallError::Remote("missing 'employee_id'".to_string()));
}

#[tokio::test]
async fn unknown_operation_surfaces_as_remote_error() {
    let broker = Arc::new(InMemoryBroker::new());
    let (caller, _responder) = pair(&broker).await;

    let err = caller
        .client()
        .call(RESPONDER, "does_not_exist", Payload::new(), TIMEOUT)
        .await
        .unwrap_err();

    assert_eq!(err, CallError::Remote("unknown message type".to_string()));
}

#[tokio::test]
async fn call_without_responder_times_out_and_cleans_up() {
    let broker = Arc::new(InMemoryBroker::new());
    let caller = RpcNode::start(broker.clone(), CALLER, DispatchTable::new(), 8)
        .await
        .unwrap();

    let err = caller
        .client()
        .call("nobody-home", "find_employee_by_id", Payload::new(), Duration::from_millis(100))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(caller.pending_calls(), 0);
    // The request was still published; nobody consumed it.
    assert_eq!(broker.published_to("nobody-home").len(), 1);
}

#[tokio::test]
async fn late_reply_after_timeout_is_an_orphan() {
    let broker = Arc::new(InMemoryBroker::new());
    let caller = RpcNode::start(broker.clone(), CALLER, DispatchTable::new(), 8)
        .await
        .unwrap();

    let err = caller
        .client()
        .call(RESPONDER, "find_employee_by_id", Payload::new(), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let request: OutboundEnvelope =
        serde_json::from_slice(&broker.published_to(RESPONDER)[0]).unwrap();
    broker
        .publish(CALLER, &fixtures::reply(request.id.as_str(), json!({ "result": "late" })))
        .await
        .unwrap();

    // Follow with a reply nobody waits for either, then make sure both were consumed.
    broker
        .publish(CALLER, &fixtures::reply("unrelated", json!({})))
        .await
        .unwrap();
    tokio::time::timeout(TIMEOUT, async {
        while broker.acked(CALLER) < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(caller.pending_calls(), 0);
}

#[tokio::test]
async fn cancelled_call_releases_its_entry() {
    let broker = Arc::new(InMemoryBroker::new());
    let caller = RpcNode::start(broker.clone(), CALLER, DispatchTable::new(), 8)
        .await
        .unwrap();

    let client = caller.client();
    let call = tokio::spawn(async move {
        client
            .call(RESPONDER, "find_employee_by_id", Payload::new(), Duration::from_secs(3600))
            .await
    });
    broker.wait_for_published(RESPONDER, 1, TIMEOUT).await;
    assert_eq!(caller.pending_calls(), 1);

    call.abort();
    let _ = call.await;
    assert_eq!(caller.pending_calls(), 0);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_answered_out_of_order_get_their_own_reply() {
    const CALLS: usize = 100;

    let broker = Arc::new(InMemoryBroker::new());
    let caller = RpcNode::start(broker.clone(), CALLER, DispatchTable::new(), 256)
        .await
        .unwrap();

    // Hand-rolled responder: collect every request, then answer in shuffled order.
    let mut requests = broker.consume(RESPONDER).await.unwrap();
    let responder = {
        let broker = broker.clone();
        tokio::spawn(async move {
            let mut pending = Vec::with_capacity(CALLS);
            while pending.len() < CALLS {
                let delivery = requests.next().await.unwrap().unwrap();
                let request: OutboundEnvelope = serde_json::from_slice(delivery.body()).unwrap();
                delivery.ack().unwrap();
                pending.push(request);
            }
            pending.shuffle(&mut rand::thread_rng());
            for request in pending {
                let reply = InboundEnvelope::reply(request.id, request.message_data);
                broker
                    .publish(&request.reply_to, &reply.to_vec().unwrap())
                    .await
                    .unwrap();
            }
        })
    };

    let calls: Vec<_> = (0..CALLS)
        .map(|n| {
            let client: RpcClient = caller.client();
            tokio::spawn(async move {
                let payload = fixtures::payload(json!({ "n": n }));
                let reply = client.call(RESPONDER, "echo", payload, TIMEOUT).await.unwrap();
                (n, reply)
            })
        })
        .collect();

    for call in calls {
        let (n, reply) = call.await.unwrap();
        assert_eq!(Value::Object(reply), json!({ "n": n }));
    }
    responder.await.unwrap();
    assert_eq!(caller.pending_calls(), 0);
}

#[tokio::test]
async fn handler_can_call_another_service_while_loop_keeps_running() {
    const GATEWAY: &str = "hr-gateway";

    let broker = Arc::new(InMemoryBroker::new());
    let directory_node = RpcNode::start(broker.clone(), RESPONDER, directory(), 8)
        .await
        .unwrap();

    // The gateway answers `greet` by calling the directory through its own client,
    // so the reply to that nested call arrives on the gateway's own queue.
    let gateway_client: Arc<OnceLock<RpcClient>> = Arc::new(OnceLock::new());
    let handler_client = Arc::clone(&gateway_client);
    let gateway_table = DispatchTable::new().route("greet", move |lookup: ProfileLookup| {
        let client = handler_client.get().cloned();
        async move {
            let client = client.ok_or("gateway not ready")?;
            let profile: EmployeeProfile = client
                .call_typed(RESPONDER, "find_employee_by_id", lookup, TIMEOUT)
                .await
                .map_err(|e| e.to_string())?;
            let greeting = format!("Welcome, {}!", profile.full_name());
            Ok::<_, String>(fixtures::payload(json!({ "greeting": greeting })))
        }
    });
    let gateway = RpcNode::start(broker.clone(), GATEWAY, gateway_table, 8)
        .await
        .unwrap();
    gateway_client.set(gateway.client()).unwrap();

    let caller = RpcNode::start(broker.clone(), CALLER, DispatchTable::new(), 8)
        .await
        .unwrap();
    let reply = caller
        .client()
        .call(GATEWAY, "greet", lookup("E-9").into_payload(), TIMEOUT)
        .await
        .unwrap();

    assert_eq!(Value::Object(reply), json!({ "greeting": "Welcome, Grace Hopper!" }));
    assert_eq!(gateway.pending_calls(), 0);
    directory_node.shutdown(TIMEOUT).await;
}

// ============================================================================
// Startup
// ============================================================================

#[tokio::test]
async fn node_start_fails_when_queue_cannot_be_consumed() {
    let broker = Arc::new(InMemoryBroker::new());
    broker.fail_consumes_from(CALLER);

    let result = RpcNode::start(broker.clone(), CALLER, DispatchTable::new(), 8).await;

    assert!(result.is_err());
    assert!(!broker.has_consumer(CALLER));
}
