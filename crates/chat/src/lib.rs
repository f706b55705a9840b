//! Chat-facing poll services: post rendering, action handling, poll creation and scheduled ends,
//! written against the platform collaborator traits in [`platform`].

pub mod actions;
pub mod attachments;
pub mod commands;
pub mod platform;
pub mod render;
pub mod scheduler;

use std::sync::Arc;

use tallyho_core::config::{AppConfig, DisplayNamePolicy};
use tallyho_core::i18n::Translations;
use tallyho_core::time::Clock;
use tallyho_db::{Store, StoreError};

pub use actions::{ActionDispatcher, ActionOutcome, ActionRequest, DialogSubmission, OutcomeStatus};
pub use attachments::{Post, POLL_POST_TYPE};
pub use commands::{CommandRequest, CommandService};
pub use platform::{PlatformError, PlatformHandles, UserProfile};
pub use render::PollRenderer;
pub use scheduler::{PollEnder, SchedulerService};

/// The slice of configuration the chat services read. Captured once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatSettings {
    pub site_url: String,
    pub bot_user_id: String,
    pub route_prefix: String,
    pub trigger: String,
    pub display_name: DisplayNamePolicy,
}

impl ChatSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            site_url: config.platform.site_url.trim_end_matches('/').to_owned(),
            bot_user_id: config.platform.bot_user_id.clone(),
            route_prefix: config.platform.route_prefix(),
            trigger: config.poll.trigger.clone(),
            display_name: config.platform.display_name,
        }
    }

    pub fn icon_url(&self) -> String {
        format!("{}{}/logo_dark.png", self.site_url, self.route_prefix)
    }
}

/// The wired service graph shared by the HTTP handlers.
#[derive(Clone)]
pub struct ChatServices {
    pub actions: Arc<ActionDispatcher>,
    pub commands: Arc<CommandService>,
    pub scheduler: Arc<SchedulerService>,
    pub store: Store,
    pub platform: PlatformHandles,
}

impl ChatServices {
    pub fn new(
        store: Store,
        platform: PlatformHandles,
        translations: Arc<Translations>,
        clock: Arc<dyn Clock>,
        settings: ChatSettings,
    ) -> Self {
        let renderer = Arc::new(PollRenderer::new(
            settings.route_prefix.clone(),
            Arc::new(platform::CreatorNames::new(platform.users.clone(), settings.display_name)),
            Arc::new(platform::VoterNames::new(platform.users.clone())),
        ));
        let actions = Arc::new(ActionDispatcher::new(
            store.clone(),
            platform.clone(),
            Arc::clone(&renderer),
            Arc::clone(&translations),
            settings.clone(),
        ));
        let scheduler = Arc::new(SchedulerService::new(actions.clone(), Arc::clone(&clock)));
        let commands = Arc::new(CommandService::new(
            store.clone(),
            platform.clone(),
            renderer,
            translations,
            Arc::clone(&scheduler),
            clock,
            settings,
        ));
        Self { actions, commands, scheduler, store, platform }
    }

    /// Re-arms end timers for stored polls.
    pub async fn activate(&self) -> Result<usize, StoreError> {
        self.scheduler.activate(self.store.polls()).await
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use tallyho_core::config::DisplayNamePolicy;

    use super::ChatSettings;

    #[test]
    fn icon_url_is_served_under_the_route_prefix() {
        let settings = ChatSettings {
            site_url: "https://chat.example.com".to_owned(),
            bot_user_id: "bot".to_owned(),
            route_prefix: "/plugins/com.github.tallyho".to_owned(),
            trigger: "poll".to_owned(),
            display_name: DisplayNamePolicy::FullName,
        };

        assert_eq!(
            settings.icon_url(),
            "https://chat.example.com/plugins/com.github.tallyho/logo_dark.png"
        );
    }
}
