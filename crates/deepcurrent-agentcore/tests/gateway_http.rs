//! Gateway client tests over a mock HTTP server.

use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use deepcurrent_agentcore::gateway::GatewayClient;
use deepcurrent_agentcore::signer::RequestSigner;
use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn test_signer() -> RequestSigner {
    let credentials = Credentials::new("AKIDTEST", "secret", None, None, "test");
    RequestSigner::new(
        SharedCredentialsProvider::new(credentials),
        "us-west-2",
        "bedrock-agentcore",
    )
}

struct JsonRpcResponder;

impl Respond for JsonRpcResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let id = body.get("id").cloned().unwrap_or(json!(1));
        match body.get("method").and_then(|m| m.as_str()) {
            Some("tools/list") => ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "tools": [
                        {
                            "name": "research-target___tavily_search",
                            "description": "Search the web",
                            "inputSchema": {
                                "type": "object",
                                "properties": { "query": { "type": "string" } },
                                "required": ["query"]
                            }
                        },
                        {
                            "name": "wikipedia_search",
                            "description": "Search Wikipedia",
                            "inputSchema": { "type": "object" }
                        }
                    ]
                }
            })),
            Some("tools/call") => {
                let name = body.pointer("/params/name").and_then(|n| n.as_str());
                assert_eq!(
                    name,
                    Some("research-target___tavily_search"),
                    "the qualified name goes on the wire"
                );
                ResponseTemplate::new(200).set_body_json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "content": [{ "type": "text", "text": "{\"results\": []}" }],
                        "isError": false
                    }
                }))
            }
            _ => ResponseTemplate::new(400),
        }
    }
}

#[tokio::test]
async fn discovery_exposes_short_names_and_calls_use_qualified_names() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(JsonRpcResponder)
        .mount(&server)
        .await;

    let client = GatewayClient::new(server.uri(), test_signer());

    let tools = client.discover(false).await.unwrap();
    assert_eq!(tools.len(), 2);
    assert!(tools.iter().any(|t| t.name == "tavily_search"));

    let result = client
        .invoke("tavily_search", json!({ "query": "rust" }))
        .await
        .unwrap();
    assert_eq!(result["isError"], false);
}

#[tokio::test]
async fn discovery_is_cached_until_forced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(JsonRpcResponder)
        .expect(2) // one initial discovery, one forced refresh
        .mount(&server)
        .await;

    let client = GatewayClient::new(server.uri(), test_signer());
    client.discover(false).await.unwrap();
    client.discover(false).await.unwrap();
    client.discover(true).await.unwrap();
}

#[tokio::test]
async fn schema_violations_never_reach_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(JsonRpcResponder)
        .expect(1) // discovery only; the invalid call is rejected locally
        .mount(&server)
        .await;

    let client = GatewayClient::new(server.uri(), test_signer());
    let err = client
        .invoke("tavily_search", json!({ "query": 42 }))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("input schema"));
}
