//! Request orchestration
//!
//! One inbound request goes through: decode, resolve the model, select the
//! candidates, then dispatch to them in order until one answers. Transport
//! failures and rejected credentials move on to the next candidate; a payload
//! the backend refuses is surfaced immediately. Exhausting the list yields a
//! single `FailoverExhausted` error.
//!
//! A streamed attempt is committed once the backend has answered 2xx and
//! produced its first chunk. Anything that goes wrong after that ends the
//! downstream stream with one error frame instead of failing over.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn, Instrument};

use crate::config::ModelPrice;
use crate::credentials::UpstreamAuthError;
use crate::error::{AppError, AppResult};
use crate::registry::{Candidate, Tenant};
use crate::routes::metrics::record_tokens;
use crate::routing::ModelNotFoundError;
use crate::streaming::{from_response, ByteStream};
use crate::tokens::{count_request_tokens, count_tokens};
use crate::translate::{
    self, codec_for, relay, sanitize, ChatRequest, EncoderOptions, RelayPlan, TranslationError,
    Usage, WireFormat,
};
use crate::upstream::client::Operation;
use crate::upstream::{BackendFamily, DispatchError, FailureClass, LeasedStream, PoolSlot};
use crate::usage::{UsageFact, UsageSink};
use crate::AppState;

use super::context::RequestContext;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// What a committed attempt produced
enum Answer {
    Complete(Value),
    Stream(LeasedStream),
}

struct Committed {
    tenant: Arc<Tenant>,
    answer: Answer,
}

/// Serve a chat request arriving in `format`.
///
/// Always returns a response; failures are rendered in the caller's error
/// shape.
pub async fn chat(
    state: &AppState,
    format: WireFormat,
    endpoint: &'static str,
    body: Value,
) -> Response {
    let model = body.get("model").and_then(Value::as_str).unwrap_or_default();
    let mut ctx = RequestContext::new(format, endpoint, model);
    let span = ctx.create_span();

    let result = chat_inner(state, &mut ctx, body).instrument(span).await;
    finish(ctx, result)
}

/// Serve an OpenAI-style embeddings request.
pub async fn embeddings(state: &AppState, endpoint: &'static str, body: Value) -> Response {
    let model = body.get("model").and_then(Value::as_str).unwrap_or_default();
    let mut ctx = RequestContext::new(WireFormat::OpenAi, endpoint, model);
    let span = ctx.create_span();

    let result = embeddings_inner(state, &mut ctx, body).instrument(span).await;
    finish(ctx, result)
}

fn finish(ctx: RequestContext, result: AppResult<Response>) -> Response {
    let mut response = match result {
        Ok(response) => response,
        Err(e) => {
            ctx.log_error(&e.to_string());
            e.in_format(ctx.format).into_response()
        }
    };
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn chat_inner(
    state: &AppState,
    ctx: &mut RequestContext,
    body: Value,
) -> AppResult<Response> {
    let request = codec_for(ctx.format).decode_request(&body)?;
    ctx.model = request.model.clone();
    ctx.streaming = request.stream;
    ctx.log_request_start();

    let family = resolve_family(state, &request.model)?;
    let target = family.wire_format();
    let candidates = state.selector.select(&request.model)?;

    // Same format on both sides: forward the caller's body untouched apart
    // from sanitizing, so fields the IR does not model survive.
    let mut outbound = if target == ctx.format {
        body
    } else {
        codec_for(target).encode_request(&request)?
    };
    let removed = sanitize(&mut outbound, &state.registry.sanitize_rules(family));
    if removed > 0 {
        debug!(
            request_id = %ctx.request_id,
            family = %family.as_str(),
            removed,
            "Stripped fields the backend rejects"
        );
    }

    let op = Operation::Chat {
        stream: request.stream,
    };
    let committed = dispatch(state, ctx, &candidates, op, &outbound).await?;

    match committed.answer {
        Answer::Complete(value) => {
            complete_chat(state, ctx, &request, target, &committed.tenant, value)
        }
        Answer::Stream(upstream) => {
            stream_chat(state, ctx, &request, target, &committed.tenant, upstream)
        }
    }
}

fn resolve_family(state: &AppState, model: &str) -> Result<BackendFamily, ModelNotFoundError> {
    state
        .registry
        .resolve(model)
        .map(|entry| entry.family)
        .ok_or_else(|| ModelNotFoundError(model.to_string()))
}

/// Try `candidates` in order until one commits.
async fn dispatch(
    state: &AppState,
    ctx: &mut RequestContext,
    candidates: &[Candidate],
    op: Operation,
    body: &Value,
) -> AppResult<Committed> {
    let stream = matches!(op, Operation::Chat { stream: true });
    let mut last_error: Option<String> = None;
    let mut last_auth_error: Option<UpstreamAuthError> = None;
    let mut reached_backend = false;

    for candidate in candidates {
        let tenant = &candidate.tenant;
        ctx.log_attempt(&tenant.name, candidate.url());

        let token = match state.token_manager.acquire(tenant).await {
            Ok(token) => token,
            Err(e) => {
                let reason = e.to_string();
                ctx.log_failover(&tenant.name, candidate.url(), &reason);
                last_error = Some(reason);
                last_auth_error = Some(e);
                continue;
            }
        };

        let client = match state
            .client_cache
            .client(tenant, &candidate.deployment.model)
            .await
        {
            Ok(client) => client,
            Err(e) => {
                let reason = e.to_string();
                ctx.log_failover(&tenant.name, candidate.url(), &reason);
                last_error = Some(reason);
                continue;
            }
        };
        let url = client.endpoint(&candidate.deployment, op).ok_or_else(|| {
            TranslationError::UnsupportedOperation {
                operation: "embeddings".to_string(),
                family: client.family().as_str().to_string(),
            }
        })?;

        let mut payload = body.clone();
        client.finalize_body(&mut payload, op);

        // Saturation is not a property of the candidate; trying another one
        // would only wait on the same pool.
        let slot = state.client_cache.pool().acquire().await?;
        reached_backend = true;

        let outcome = match client.post(&url, &token, &payload, stream).await {
            Ok(response) if stream => open_stream(
                response,
                slot,
                &ctx.request_id,
                state.config.stream_idle_timeout,
            )
            .await
            .map(Answer::Stream),
            Ok(response) => response
                .json::<Value>()
                .await
                .map(Answer::Complete)
                .map_err(DispatchError::from_reqwest),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(answer) => {
                return Ok(Committed {
                    tenant: Arc::clone(tenant),
                    answer,
                })
            }
            Err(e) => {
                match (e.class(), &e) {
                    (FailureClass::Validation, DispatchError::Status { status, body }) => {
                        warn!(
                            request_id = %ctx.request_id,
                            tenant = %tenant.name,
                            status,
                            "Backend rejected the payload"
                        );
                        return Err(AppError::UpstreamValidation {
                            status: *status,
                            body: body.clone(),
                        });
                    }
                    (FailureClass::CredentialRejected, _) => {
                        state.token_manager.invalidate(&tenant.name);
                    }
                    _ => {}
                }
                let reason = e.to_string();
                ctx.log_failover(&tenant.name, candidate.url(), &reason);
                last_error = Some(reason);
            }
        }
    }

    match last_auth_error {
        Some(e) if !reached_backend => Err(AppError::UpstreamAuth(e)),
        _ => Err(AppError::FailoverExhausted {
            attempts: ctx.attempt,
            last_error: last_error.unwrap_or_else(|| "no candidates".to_string()),
        }),
    }
}

/// Wait for the first chunk of a 2xx stream. Until it arrives the attempt
/// can still fail over.
async fn open_stream(
    response: reqwest::Response,
    slot: PoolSlot,
    request_id: &str,
    idle_timeout: Duration,
) -> Result<LeasedStream, DispatchError> {
    let mut upstream = from_response(response);

    let first = match tokio::time::timeout(idle_timeout, upstream.next()).await {
        Ok(Some(Ok(chunk))) => chunk,
        Ok(Some(Err(e))) => return Err(DispatchError::Transport(e.to_string())),
        Ok(None) => {
            return Err(DispatchError::Transport(
                "stream closed before the first chunk".to_string(),
            ))
        }
        Err(_) => {
            return Err(DispatchError::Transport(format!(
                "timeout: no stream data within {} s",
                idle_timeout.as_secs()
            )))
        }
    };

    let replay: ByteStream = Box::pin(futures::stream::once(async move { Ok(first) }).chain(upstream));
    Ok(LeasedStream::new(replay, slot, request_id))
}

fn complete_chat(
    state: &AppState,
    ctx: &RequestContext,
    request: &ChatRequest,
    target: WireFormat,
    tenant: &Tenant,
    upstream: Value,
) -> AppResult<Response> {
    let passthrough = target == ctx.format;
    let decoded = match codec_for(target).decode_response(&upstream) {
        Ok(decoded) => Some(decoded),
        Err(e) if passthrough => {
            debug!(request_id = %ctx.request_id, error = %e, "Could not read backend usage");
            None
        }
        Err(e) => {
            return Err(AppError::Internal(anyhow::anyhow!(
                "unreadable {} response: {}",
                target,
                e
            )))
        }
    };

    let usage = decoded
        .as_ref()
        .and_then(|d| d.usage)
        .unwrap_or_else(|| {
            let completion = decoded
                .as_ref()
                .map(|d| {
                    let arguments: String =
                        d.tool_calls.iter().map(|c| c.arguments.to_string()).collect();
                    count_tokens(&d.content) + count_tokens(&arguments)
                })
                .unwrap_or(0);
            Usage {
                prompt_tokens: count_request_tokens(request),
                completion_tokens: completion,
            }
        });

    let body = match decoded {
        Some(decoded) if !passthrough => {
            codec_for(ctx.format).encode_response(&decoded, &request.model)
        }
        _ => upstream,
    };

    UsageRecorder::new(state, ctx, &tenant.name).finish(usage, false);
    Ok(Json(body).into_response())
}

fn stream_chat(
    state: &AppState,
    ctx: &RequestContext,
    request: &ChatRequest,
    target: WireFormat,
    tenant: &Tenant,
    upstream: LeasedStream,
) -> AppResult<Response> {
    let plan = RelayPlan {
        request_id: ctx.request_id.clone(),
        decoder: codec_for(target).stream_decoder(),
        encoder: codec_for(ctx.format).stream_encoder(EncoderOptions {
            request_id: ctx.request_id.clone(),
            model: request.model.clone(),
            include_usage: request.stream_usage,
        }),
        passthrough: target == ctx.format,
        idle_timeout: state.config.stream_idle_timeout,
    };

    let prompt_estimate = count_request_tokens(request);
    let recorder = UsageRecorder::new(state, ctx, &tenant.name);
    let frames = relay(upstream, plan, move |summary| {
        let usage = if summary.usage_reported {
            summary.usage
        } else {
            Usage {
                prompt_tokens: prompt_estimate,
                completion_tokens: count_tokens(&summary.text)
                    + count_tokens(&summary.tool_arguments),
            }
        };
        recorder.finish(usage, true);
    });

    ctx.log_stream_started(&tenant.name);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(frames))
        .map_err(|e| AppError::Internal(e.into()))
}

async fn embeddings_inner(
    state: &AppState,
    ctx: &mut RequestContext,
    body: Value,
) -> AppResult<Response> {
    let obj = body.as_object().ok_or(TranslationError::NotAnObject)?;
    let model = translate::required_str(obj, "model")?.to_string();
    let input = obj
        .get("input")
        .ok_or_else(|| TranslationError::MissingField("input".to_string()))?;
    let input_text = translate::string_list(Some(input)).join("\n");
    ctx.model = model.clone();
    ctx.log_request_start();

    let family = resolve_family(state, &model)?;
    if family != BackendFamily::OpenAi {
        return Err(TranslationError::UnsupportedOperation {
            operation: "embeddings".to_string(),
            family: family.as_str().to_string(),
        }
        .into());
    }
    let candidates = state.selector.select(&model)?;

    let committed = dispatch(state, ctx, &candidates, Operation::Embeddings, &body).await?;
    let Answer::Complete(value) = committed.answer else {
        return Err(AppError::Internal(anyhow::anyhow!(
            "embeddings backend answered with a stream"
        )));
    };

    let prompt_tokens = value
        .pointer("/usage/prompt_tokens")
        .and_then(Value::as_u64)
        .unwrap_or_else(|| count_tokens(&input_text));
    UsageRecorder::new(state, ctx, &committed.tenant.name).finish(
        Usage {
            prompt_tokens,
            completion_tokens: 0,
        },
        false,
    );

    Ok(Json(value).into_response())
}

/// Emits the usage fact of one successful request
struct UsageRecorder {
    sink: Arc<dyn UsageSink>,
    price: ModelPrice,
    ctx: RequestContext,
    tenant: String,
}

impl UsageRecorder {
    fn new(state: &AppState, ctx: &RequestContext, tenant: &str) -> Self {
        Self {
            sink: Arc::clone(&state.usage_sink),
            price: state.registry.price(&ctx.model),
            ctx: ctx.clone(),
            tenant: tenant.to_string(),
        }
    }

    fn finish(self, usage: Usage, streamed: bool) {
        record_tokens(&self.ctx.model, "prompt", usage.prompt_tokens);
        record_tokens(&self.ctx.model, "completion", usage.completion_tokens);
        self.ctx
            .log_completed(&self.tenant, usage.prompt_tokens, usage.completion_tokens);

        self.sink.record(UsageFact::new(
            self.ctx.request_id,
            self.ctx.model,
            self.tenant,
            usage.prompt_tokens,
            usage.completion_tokens,
            self.price,
            streamed,
        ));
    }
}
