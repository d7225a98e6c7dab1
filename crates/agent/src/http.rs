//! `reqwest` implementations of the downstream capabilities.
//!
//! Calls carry no timeout of their own: the [`crate::guard::CapabilityGuard`]
//! bounds every call and records the outcome against the endpoint's breaker.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use concierge_core::capability::{
    ConversationRecorder, Endpoint, EscalationNotifier, OrderLookup, RefundInitiation,
    ResponseGenerator,
};
use concierge_core::config::CapabilitiesConfig;
use concierge_core::domain::capability::{
    AppendOutcome, ConversationEntry, EscalationAck, EscalationNotice, GenerationReply,
    GenerationRequest, OrderLookupOutcome, OrderRecord, RefundReceipt, RefundRequest,
};
use concierge_core::errors::CapabilityError;

#[derive(Clone, Debug)]
pub struct HttpCapabilities {
    client: Client,
    order_url: String,
    refund_url: String,
    generation_url: String,
    handoff_url: String,
    conversation_url: String,
    api_token: Option<SecretString>,
}

impl HttpCapabilities {
    pub fn new(client: Client, config: &CapabilitiesConfig) -> Self {
        let trim = |url: &str| url.trim_end_matches('/').to_string();
        Self {
            client,
            order_url: trim(&config.order_url),
            refund_url: trim(&config.refund_url),
            generation_url: trim(&config.generation_url),
            handoff_url: trim(&config.handoff_url),
            conversation_url: trim(&config.conversation_url),
            api_token: config.api_token.clone(),
        }
    }

    pub fn from_config(config: &CapabilitiesConfig) -> Self {
        Self::new(Client::new(), config)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn send(
        &self,
        endpoint: Endpoint,
        request: RequestBuilder,
    ) -> Result<Response, CapabilityError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|error| CapabilityError::transport(endpoint, error.to_string()))
    }

    /// `{order_url}/order/{order_id}` with the id as one escaped path segment.
    fn order_lookup_url(&self, order_id: &str) -> Result<Url, CapabilityError> {
        let endpoint = Endpoint::OrderLookup;
        let mut url = Url::parse(&self.order_url).map_err(|error| {
            CapabilityError::transport(endpoint, format!("invalid order service url: {error}"))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                CapabilityError::transport(endpoint, "order service url cannot carry a path")
            })?
            .pop_if_empty()
            .push("order")
            .push(order_id);
        Ok(url)
    }

    async fn post_json<B, T>(
        &self,
        endpoint: Endpoint,
        url: String,
        body: &B,
    ) -> Result<T, CapabilityError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(endpoint, self.client.post(url).json(body)).await?;
        let response = ensure_success(endpoint, response)?;
        decode(endpoint, response).await
    }
}

fn ensure_success(endpoint: Endpoint, response: Response) -> Result<Response, CapabilityError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(CapabilityError::transport(endpoint, format!("downstream returned HTTP {status}")))
    }
}

async fn decode<T: DeserializeOwned>(
    endpoint: Endpoint,
    response: Response,
) -> Result<T, CapabilityError> {
    response
        .json::<T>()
        .await
        .map_err(|error| CapabilityError::invalid_response(endpoint, error.to_string()))
}

#[async_trait]
impl OrderLookup for HttpCapabilities {
    async fn lookup(&self, order_id: &str) -> Result<OrderLookupOutcome, CapabilityError> {
        let endpoint = Endpoint::OrderLookup;
        // Dot segments are dropped by URL normalisation and can never name an order.
        if matches!(order_id, "" | "." | "..") {
            return Ok(OrderLookupOutcome::NotFound);
        }
        let url = self.order_lookup_url(order_id)?;
        let response = self.send(endpoint, self.client.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(OrderLookupOutcome::NotFound);
        }

        let payload: Value = decode(endpoint, ensure_success(endpoint, response)?).await?;
        if payload.get("error").is_some_and(|error| !error.is_null()) {
            return Ok(OrderLookupOutcome::NotFound);
        }

        let record: OrderRecord = serde_json::from_value(payload)
            .map_err(|error| CapabilityError::invalid_response(endpoint, error.to_string()))?;
        Ok(OrderLookupOutcome::Found(record))
    }
}

#[async_trait]
impl RefundInitiation for HttpCapabilities {
    async fn initiate(&self, request: RefundRequest) -> Result<RefundReceipt, CapabilityError> {
        let url = format!("{}/refund/initiate", self.refund_url);
        self.post_json(Endpoint::RefundInitiate, url, &request).await
    }
}

#[async_trait]
impl ResponseGenerator for HttpCapabilities {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationReply, CapabilityError> {
        let url = format!("{}/generate", self.generation_url);
        self.post_json(Endpoint::Generate, url, &request).await
    }
}

#[async_trait]
impl EscalationNotifier for HttpCapabilities {
    async fn notify(&self, notice: EscalationNotice) -> Result<EscalationAck, CapabilityError> {
        let url = format!("{}/escalate", self.handoff_url);
        self.post_json(Endpoint::Escalate, url, &notice).await
    }
}

#[async_trait]
impl ConversationRecorder for HttpCapabilities {
    async fn append(&self, entry: ConversationEntry) -> Result<AppendOutcome, CapabilityError> {
        let endpoint = Endpoint::ConversationAppend;
        let url = format!("{}/conversation/add", self.conversation_url);
        let body = json!({
            "session_id": entry.session_id,
            "message_id": entry.message_id,
            "user_id": entry.user_id,
            "message": entry.message,
            "response": entry.response,
            "intent": entry.intent,
            "confidence": entry.confidence,
            "timestamp": entry.recorded_at.to_rfc3339(),
        });

        let response = self.send(endpoint, self.client.post(url).json(&body)).await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(AppendOutcome::Duplicate);
        }
        ensure_success(endpoint, response)?;
        Ok(AppendOutcome::Appended)
    }
}
