//! Request interception: every call to the remote service passes through an
//! [`Interceptor`] that picks a caching strategy per route, plus the
//! [`BackgroundAgent`] that keeps the cache and the offline queue moving.

mod agent;
mod http;
mod interceptor;
mod routes;

pub use agent::BackgroundAgent;
pub use http::{
  HttpRequest, HttpResponse, ReqwestTransport, Transport, OFFLINE_HEADER, SOURCE_HEADER,
};
pub use interceptor::{Interceptor, InterceptorOptions, LifecycleState, RefreshReport};
pub use routes::{PathMatch, RouteRule, RouteTable, Strategy};
