//! A complete scenario against a small address-book API: every user
//! registers a throwaway account and logs in at startup, then mixes
//! GraphQL and REST create flows, with an occasional explicit re-login.
//!
//! Run with the target service listening locally:
//!
//! ```sh
//! TARGET_HOST=http://localhost:4000 cargo run --example http
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::distr::Alphanumeric;
use rand::Rng;
use serde_json::json;
use stampede::{
    classify_status, task, FailureKind, HttpRequest, HttpResponse, Outcome, ReqwestTransport,
    RunPlan, SessionContext, TaskRegistry, TextReport, Transport, VirtualUserPool,
    WaitTimePolicy,
};

const PASSWORD: &str = "opensesame";

fn ok_or_kind(resp: &HttpResponse) -> Result<(), FailureKind> {
    match classify_status(resp.status) {
        Some(kind) => Err(kind),
        None => Ok(()),
    }
}

fn field<'a>(value: &'a serde_json::Value, path: &[&str]) -> Result<&'a str, FailureKind> {
    let mut cursor = value;
    for key in path {
        cursor = cursor.get(key).ok_or(FailureKind::ProtocolError)?;
    }
    cursor.as_str().ok_or(FailureKind::ProtocolError)
}

fn bearer_token(session: &SessionContext) -> Result<String, FailureKind> {
    session
        .auth_token()
        .map(str::to_owned)
        .ok_or(FailureKind::AuthError)
}

async fn login(
    session: &mut SessionContext,
    transport: &dyn Transport,
) -> Result<(), FailureKind> {
    let email = session
        .attribute("email")
        .ok_or(FailureKind::AuthError)?
        .to_owned();
    let resp = transport
        .send(HttpRequest::post("/api/login").form(vec![
            ("email".into(), email),
            ("password".into(), PASSWORD.into()),
        ]))
        .await?;
    ok_or_kind(&resp)?;
    let jwt = field(&resp.json()?, &["jwt"])?.to_owned();
    session.set_auth_token(jwt);
    Ok(())
}

/// On-start task: register a unique account, then log in and stash the
/// token for every later task.
async fn register_and_login(session: &mut SessionContext, transport: &dyn Transport) -> Outcome {
    let inner = async {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(7)
            .map(char::from)
            .collect();
        let email = format!("{suffix}@example.com");

        let resp = transport
            .send(HttpRequest::post("/graphql").json(json!({
                "query": "mutation CreateAccount($e: String!, $n: String!, $p: String!, $i: String!) { \
                          createAccount(email: $e, name: $n, password: $p, isAdmin: $i) { id } }",
                "variables": { "e": email, "n": suffix, "p": PASSWORD, "i": "false" },
            })))
            .await?;
        ok_or_kind(&resp)?;

        session.set_attribute("email", email);
        login(session, transport).await
    };
    match inner.await {
        Ok(()) => Outcome::Success,
        Err(kind) => Outcome::Failure(kind),
    }
}

/// GraphQL flow: create an address, then a node referencing its id.
async fn create_domain_graphql(session: &mut SessionContext, transport: &dyn Transport) -> Outcome {
    let inner = async {
        let token = bearer_token(session)?;

        let resp = transport
            .send(
                HttpRequest::post("/graphql")
                    .bearer(&token)
                    .json(json!({
                        "query": "mutation CreateAddress($city: String!, $country: String!, \
                                  $code: String!, $postcode: String!, $state: String!, $district: String!) { \
                                  createAddress(city: $city, country: $country, countryCode: $code, \
                                  postcode: $postcode, state: $state, stateDistrict: $district) { id city } }",
                        "variables": {
                            "city": "Paris", "country": "France", "code": "FR",
                            "postcode": "75019", "state": "Ile-de-France", "district": "Paris",
                        },
                    })),
            )
            .await?;
        ok_or_kind(&resp)?;
        let address_id = field(&resp.json()?, &["data", "createAddress", "id"])?.to_owned();

        let resp = transport
            .send(
                HttpRequest::post("/graphql")
                    .bearer(&token)
                    .json(json!({
                        "query": "mutation CreateNode($addr: ID!, $lat: String!, $lon: String!, $name: String!) { \
                                  createNode(addrId: $addr, latitude: $lat, longitude: $lon, name: $name) { id } }",
                        "variables": {
                            "addr": address_id, "name": "demo node",
                            "lat": "48.8872", "lon": "2.3820",
                        },
                    })),
            )
            .await?;
        ok_or_kind(&resp)
    };
    match inner.await {
        Ok(()) => Outcome::Success,
        Err(kind) => Outcome::Failure(kind),
    }
}

/// REST flow: same two-step create, passing the address id through the
/// session between the steps.
async fn create_domain_rest(session: &mut SessionContext, transport: &dyn Transport) -> Outcome {
    let inner = async {
        let token = bearer_token(session)?;

        let resp = transport
            .send(HttpRequest::post("/api/address").bearer(&token).json(json!({
                "address": {
                    "city": "Paris", "country": "France", "country_code": "FR",
                    "postcode": "75019", "state": "Ile-de-France", "state_district": "Paris",
                },
            })))
            .await?;
        ok_or_kind(&resp)?;
        let address_id = field(&resp.json()?, &["data", "id"])?.to_owned();

        let resp = transport
            .send(HttpRequest::post("/api/node").bearer(&token).json(json!({
                "node": {
                    "addr_id": address_id, "name": "demo node",
                    "latitude": "48.8872", "longitude": "2.3820",
                },
            })))
            .await?;
        ok_or_kind(&resp)
    };
    match inner.await {
        Ok(()) => Outcome::Success,
        Err(kind) => Outcome::Failure(kind),
    }
}

/// Explicit re-login task, weighted low. Expired tokens are a scenario
/// concern: the engine records auth failures and keeps going, and this
/// task is how the scenario recovers.
async fn relogin(session: &mut SessionContext, transport: &dyn Transport) -> Outcome {
    match login(session, transport).await {
        Ok(()) => Outcome::Success,
        Err(kind) => Outcome::Failure(kind),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stampede=info".into()),
        )
        .init();

    let host =
        std::env::var("TARGET_HOST").unwrap_or_else(|_| "http://localhost:4000".to_string());

    let registry = TaskRegistry::builder()
        .on_start("register_and_login", task!(register_and_login))
        .task("create_domain_graphql", 3, task!(create_domain_graphql))
        .task("create_domain_rest", 3, task!(create_domain_rest))
        .task("relogin", 1, task!(relogin))
        .build();

    let plan = RunPlan::builder()
        .target_user_count(50)
        .spawn_rate_per_sec(5.0)
        .run_duration(Duration::from_secs(30))
        .host(host)
        .wait_policy(
            WaitTimePolicy::between(Duration::from_millis(300), Duration::from_millis(1500))
                .expect("valid wait range"),
        )
        .snapshot_interval(Duration::from_secs(2))
        .registry(Arc::new(registry))
        .build();

    let transport =
        Arc::new(ReqwestTransport::new(plan.host.clone()).with_timeout(Duration::from_secs(10)));
    let pool = VirtualUserPool::new(plan, transport).expect("valid run plan");

    let mut snapshots = pool.subscribe();
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let stats = snapshots.borrow().clone();
            tracing::info!(
                samples = stats.count,
                p95_ms = stats.p95.as_millis() as u64,
                "interim"
            );
        }
    });

    let report = pool.run().await;
    println!("{}", TextReport::from(&report));
}
