use std::{ops::Deref, sync::Arc};

use crate::{
    config::Config, forwarding::TaskRuns, http::auth::TokenValidator,
    service_info::ServiceInfoManager,
};

pub struct InnerWebContext {
    pub(crate) config: Config,
    pub(crate) task_runs: TaskRuns,
    pub(crate) service_info: ServiceInfoManager,
    pub(crate) token_validator: TokenValidator,
}

#[derive(Clone)]
pub struct WebContext(pub(crate) Arc<InnerWebContext>);

impl Deref for WebContext {
    type Target = InnerWebContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl WebContext {
    pub fn new(
        config: Config,
        task_runs: TaskRuns,
        service_info: ServiceInfoManager,
        http_client: reqwest::Client,
    ) -> Self {
        let token_validator = TokenValidator::new(http_client, config.auth.clone());
        Self(Arc::new(InnerWebContext {
            config,
            task_runs,
            service_info,
            token_validator,
        }))
    }

    pub fn task_runs(&self) -> &TaskRuns {
        &self.task_runs
    }
}
