use std::{
    net::SocketAddr,
    sync::Arc,
};

use eyre::WrapErr as _;
use futures::future::{
    ready,
    Either,
    Ready,
};
use jsonrpsee::{
    server::{
        middleware::rpc::{
            RpcServiceBuilder,
            RpcServiceT,
        },
        Server,
    },
    types::{
        ErrorObject,
        ErrorObjectOwned,
        Params,
        Request,
    },
    MethodResponse,
    RpcModule,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    info,
};

use crate::controller::{
    Controller,
    ControllerError,
    METHODS,
};

pub(crate) struct Builder {
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) endpoint: String,
    pub(crate) controller: Arc<Controller>,
}

impl Builder {
    /// Binds the JSON-RPC server and spawns it on the tokio runtime.
    ///
    /// Returns the address the server is listening on together with the handle of the
    /// spawned task. The task finishes once the cancellation token fires.
    pub(crate) async fn start(self) -> eyre::Result<(SocketAddr, JoinHandle<eyre::Result<()>>)> {
        let Self {
            cancellation_token,
            endpoint,
            controller,
        } = self;

        let server = Server::builder()
            .set_rpc_middleware(RpcServiceBuilder::new().layer_fn(|service| {
                UnknownMethodNotFound {
                    service,
                }
            }))
            .build(&endpoint)
            .await
            .wrap_err_with(|| format!("failed instantiating jsonrpc server `{endpoint}`"))?;
        let local_addr = server
            .local_addr()
            .wrap_err("failed reading local address of jsonrpc server")?;

        let mut module = RpcModule::new(());
        for method in METHODS {
            let controller = controller.clone();
            module
                .register_async_method(method, move |params, _, _| {
                    dispatch(controller.clone(), method, params)
                })
                .wrap_err_with(|| format!("failed registering `{method}` RPC on server"))?;
        }

        let task = tokio::spawn(async move {
            let handle = server.start(module);
            info!(%local_addr, "jsonrpc server started");
            tokio::select! {
                () = cancellation_token.cancelled() => {
                    let _ = handle.stop();
                },
                () = handle.clone().stopped() => {
                },
            };
            Ok(())
        });
        Ok((local_addr, task))
    }
}

/// Answers calls to methods the controller does not know with the same 404 that
/// [`Controller::dispatch`] reports, instead of jsonrpsee's `-32601`.
#[derive(Clone)]
struct UnknownMethodNotFound<S> {
    service: S,
}

impl<'a, S> RpcServiceT<'a> for UnknownMethodNotFound<S>
where
    S: RpcServiceT<'a> + Send + Sync,
{
    type Future = Either<S::Future, Ready<MethodResponse>>;

    fn call(&self, request: Request<'a>) -> Self::Future {
        if METHODS.iter().any(|method| *method == request.method_name()) {
            return Either::Left(self.service.call(request));
        }
        debug!(method = request.method_name(), "rejecting call to unknown method");
        let err = into_error_object(ControllerError::UnknownMethod(
            request.method_name().to_string(),
        ));
        Either::Right(ready(MethodResponse::error(request.id, err)))
    }
}

async fn dispatch(
    controller: Arc<Controller>,
    method: &'static str,
    params: Params<'static>,
) -> Result<Value, ErrorObjectOwned> {
    let params: Vec<Value> = params
        .parse::<Option<Vec<Value>>>()
        .map_err(|err| {
            ControllerError::InvalidParams(format!("params must be a positional array: {err}"))
        })
        .map_err(into_error_object)?
        .unwrap_or_default();
    debug!(method, "dispatching request");
    controller
        .dispatch(method, &params)
        .await
        .map_err(into_error_object)
}

fn into_error_object(err: ControllerError) -> ErrorObjectOwned {
    ErrorObject::owned::<()>(
        i32::from(err.status_code().as_u16()),
        err.to_string(),
        None,
    )
}
