mod pages;

pub use pages::PageContext;

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use warp::http::{StatusCode, Uri};
use warp::{Filter, Rejection, Reply};

use crate::error::{InitSetupError, Result};
use crate::setup::{Gateway, RunOutcome, StepParams};

const FORM_LIMIT: u64 = 16 * 1024;

/// `GET /` shows the current step, `POST /` requests one and redirects back
pub fn routes(
    gateway: Arc<Gateway>,
    pages: Arc<PageContext>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let show = warp::path::end()
        .and(warp::get())
        .and(with_gateway(gateway.clone()))
        .and(with_pages(pages))
        .and_then(handle_view);

    let submit = warp::body::content_length_limit(FORM_LIMIT)
        .and(warp::body::form::<StepParams>())
        .and(with_gateway(gateway))
        .and_then(handle_run)
        .recover(redirect_unreadable);

    let run = warp::path::end().and(warp::post()).and(submit);

    show.or(run)
}

fn with_gateway(
    gateway: Arc<Gateway>,
) -> impl Filter<Extract = (Arc<Gateway>,), Error = Infallible> + Clone {
    warp::any().map(move || gateway.clone())
}

fn with_pages(
    pages: Arc<PageContext>,
) -> impl Filter<Extract = (Arc<PageContext>,), Error = Infallible> + Clone {
    warp::any().map(move || pages.clone())
}

async fn handle_view(
    gateway: Arc<Gateway>,
    pages: Arc<PageContext>,
) -> std::result::Result<impl Reply, Rejection> {
    let view = tokio::task::spawn_blocking(move || gateway.view()).await;

    let reply = match view {
        Ok(Ok(view)) => warp::reply::with_status(warp::reply::html(pages.render(&view)), StatusCode::OK),
        Ok(Err(e)) => {
            error!("Failed to read setup state: {}", e);
            warp::reply::with_status(
                warp::reply::html(pages.error(&e.to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
        Err(e) => {
            error!("View task failed: {}", e);
            warp::reply::with_status(
                warp::reply::html(pages.error("internal error")),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    };
    Ok(reply)
}

async fn handle_run(
    mut params: StepParams,
    gateway: Arc<Gateway>,
) -> std::result::Result<impl Reply, Rejection> {
    let step = params.take("step").unwrap_or_default();

    let outcome = tokio::task::spawn_blocking(move || gateway.run(&step, &params)).await;

    match outcome {
        Ok(Ok(RunOutcome::Rejected(reason))) => info!("Request rejected: {}", reason),
        Ok(Ok(outcome)) => info!("Request handled: {:?}", outcome),
        Ok(Err(e)) => error!("Failed to handle request: {}", e),
        Err(e) => error!("Run task failed: {}", e),
    }

    // Always back to the status page, whatever happened
    Ok(redirect_home())
}

/// A POST whose body could not be read as a form changes nothing
async fn redirect_unreadable(rejection: Rejection) -> std::result::Result<impl Reply, Infallible> {
    warn!("Ignoring unreadable form submission: {:?}", rejection);
    Ok(redirect_home())
}

fn redirect_home() -> impl Reply {
    warp::redirect::see_other(Uri::from_static("/"))
}

/// Bind the web UI. Returns the bound address and the server future, which ends on `shutdown`.
pub fn bind(
    gateway: Arc<Gateway>,
    pages: Arc<PageContext>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, impl Future<Output = ()>)> {
    warp::serve(routes(gateway, pages))
        .try_bind_with_graceful_shutdown(addr, shutdown)
        .map_err(|e| InitSetupError::Server(format!("cannot bind {addr}: {e}")))
}
