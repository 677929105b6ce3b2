//! Server communication: transport, endpoints and typed API calls.

mod endpoints;
mod http;
mod rest;
mod result;

pub use endpoints::Endpoints;
pub use http::{
    BodyStream, Http, HttpClient, HttpRequest, HttpResponse, Method, MockHttpClient, MockReply,
    ReqwestClient,
};
pub use rest::{LoginResponse, RestApi};
pub use result::{status_message, NetworkResult};
