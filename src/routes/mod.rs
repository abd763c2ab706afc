/// Router Module Index
///
/// Routes are grouped by how credentials are enforced. The auth layers are
/// applied in `create_router`, so a route's family decides whether a bad
/// credential answers 419 or 401.

/// Unauthenticated routes (health check).
pub mod public;

/// `/api/*`: token-gated resource routes. Credential failures answer 419.
pub mod api;

/// `/savetests` and `/numbas_api`: the embedded assessment routes.
/// Credential failures answer 401.
pub mod assessment;
