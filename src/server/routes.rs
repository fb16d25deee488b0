use std::sync::Arc;

use warp::Filter;

use super::{filters, handlers};
use crate::authenticator::Authenticator;

/// All routes of the frontend. Every request is authenticated first; requests the authenticator
/// answers itself (challenges, redirects, errors) are replied to with the authenticator's response
pub fn api(
    authenticator: Arc<Authenticator>,
    scheme: &'static str,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    filters::endpoint()
        .and(filters::authenticate(authenticator.clone(), scheme))
        .and(with_authenticator(authenticator))
        .and(warp::header::optional::<String>("accept"))
        .and_then(handlers::serve)
        .recover(filters::handle_authn_rejection)
}

fn with_authenticator(
    authenticator: Arc<Authenticator>,
) -> impl Filter<Extract = (Arc<Authenticator>,), Error = std::convert::Infallible> + Clone {
    // We have to clone for this to be Fn instead of FnOnce
    warp::any().map(move || authenticator.clone())
}
