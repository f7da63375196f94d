//! The HTTP control plane: agent/middleware CRUD plus the tunnel route that
//! turns a public request into a framed command through the agent's session.

use std::collections::HashMap;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use wormhole_proto::{HttpRequest, ResponseCode};

use crate::{Agent, Context, Middleware};

pub fn router(ctx: Context) -> Router {
    Router::new()
        .route("/nodes/register", post(register_agent))
        .route("/nodes/", get(list_agents).put(update_agent))
        .route("/nodes/{id}", delete(delete_agent))
        .route(
            "/nodes/{id}/mware",
            get(list_middlewares).put(update_middleware),
        )
        .route(
            "/nodes/{id}/mware/{name}",
            post(register_middleware).delete(delete_middleware),
        )
        .route(
            "/wh/{id}/{mware}/{*rest}",
            get(tunnel).post(tunnel).put(tunnel).delete(tunnel),
        )
        .with_state(ctx)
}

// Every failure surfaces as a 400 with the reason as plain text.
fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, message.into()).into_response()
}

/// Tunnel one public request through a registered agent.
async fn tunnel(
    State(ctx): State<Context>,
    Path((id, mware, rest)): Path<(String, String, String)>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if ctx.store.get_agent(&id).is_none() {
        return bad_request(format!("The connection to node {id} is not existed."));
    }

    let Some(middleware) = ctx.store.get_middleware(&id, &mware) else {
        return bad_request(format!(
            "The specified middleware {mware} in node {id} cannot be found."
        ));
    };

    let Some(session) = ctx.registry.get(&id) else {
        return bad_request(format!("The connection to node {id} is not established."));
    };

    // Host stays empty: the agent substitutes its loopback address.
    let request = HttpRequest {
        schema: "http".to_string(),
        method: method.as_str().to_string(),
        host: String::new(),
        port: middleware.port,
        base_path: middleware.path.clone(),
        path: rest,
        headers: wire_headers(&headers),
        body: body.to_vec(),
    };

    let response = match session.dispatch(request).await {
        Ok(response) => response,
        Err(err) => return bad_request(err.to_string()),
    };

    match response {
        wormhole_proto::Response::Http(res) if res.code == ResponseCode::Ok => http_reply(res),
        wormhole_proto::Response::Basic(res)
            if matches!(res.code, ResponseCode::BadRequest | ResponseCode::ErrorFound) =>
        {
            bad_request(res.description)
        }
        _ => bad_request("unexpected response variant"),
    }
}

// Rebuild the public HTTP reply from the agent's buffered response.
fn http_reply(res: wormhole_proto::HttpResponse) -> Response {
    let mut reply = Response::new(Body::from(res.body));
    *reply.status_mut() =
        StatusCode::from_u16(res.http_response_code).unwrap_or(StatusCode::OK);

    for (name, values) in &res.header {
        // The body is re-buffered here, so framing headers do not carry over.
        if name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("transfer-encoding")
        {
            continue;
        }

        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            log::debug!("dropping invalid response header name {name:?}");
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    reply.headers_mut().append(name.clone(), value);
                }
                Err(_) => log::debug!("dropping invalid value for response header {name}"),
            }
        }
    }

    reply
}

fn wire_headers(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers {
        // The public host and body framing are meaningless on the inward
        // call; the agent's client supplies its own.
        if *name == axum::http::header::HOST || *name == axum::http::header::CONTENT_LENGTH {
            continue;
        }

        let Ok(value) = value.to_str() else {
            log::debug!("dropping non-utf8 request header {name}");
            continue;
        };
        map.entry(name.as_str().to_string())
            .or_default()
            .push(value.to_string());
    }
    map
}

async fn register_agent(State(ctx): State<Context>, Json(agent): Json<Agent>) -> Json<Agent> {
    Json(ctx.store.add_agent(agent))
}

async fn list_agents(State(ctx): State<Context>) -> Json<Vec<Agent>> {
    Json(ctx.store.list_agents())
}

async fn update_agent(State(ctx): State<Context>, Json(agent): Json<Agent>) -> Response {
    match ctx.store.update_agent(agent) {
        Ok(agent) => Json(agent).into_response(),
        Err(err) => bad_request(err.to_string()),
    }
}

async fn delete_agent(State(ctx): State<Context>, Path(id): Path<String>) -> Response {
    match ctx.store.delete_agent(&id) {
        Ok(()) => (StatusCode::OK, format!("{id} is deleted.")).into_response(),
        Err(err) => bad_request(err.to_string()),
    }
}

async fn list_middlewares(State(ctx): State<Context>, Path(id): Path<String>) -> Response {
    match ctx.store.list_middlewares(&id) {
        Ok(middlewares) => Json(middlewares).into_response(),
        Err(err) => bad_request(err.to_string()),
    }
}

async fn register_middleware(
    State(ctx): State<Context>,
    Path((id, _name)): Path<(String, String)>,
    Json(middleware): Json<Middleware>,
) -> Response {
    match ctx.store.add_middleware(&id, middleware) {
        Ok(middleware) => Json(middleware).into_response(),
        Err(err) => bad_request(err.to_string()),
    }
}

async fn update_middleware(
    State(ctx): State<Context>,
    Path(id): Path<String>,
    Json(middleware): Json<Middleware>,
) -> Response {
    match ctx.store.update_middleware(&id, middleware) {
        Ok(middleware) => Json(middleware).into_response(),
        Err(err) => bad_request(err.to_string()),
    }
}

async fn delete_middleware(
    State(ctx): State<Context>,
    Path((id, name)): Path<(String, String)>,
) -> Response {
    match ctx.store.delete_middleware(&id, &name) {
        Ok(()) => (StatusCode::OK, format!("{name} under node {id} is deleted.")).into_response(),
        Err(err) => bad_request(err.to_string()),
    }
}
