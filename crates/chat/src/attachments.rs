use serde::{Deserialize, Serialize};

pub const POLL_POST_TYPE: &str = "custom_tallyho";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub root_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub post_type: String,
    #[serde(default)]
    pub props: PostProps,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PostProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<PostAction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub title: String,
    pub value: String,
    pub short: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStyle {
    #[default]
    Default,
    Primary,
    Danger,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostAction {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub style: ActionStyle,
    pub integration: Integration,
}

impl PostAction {
    pub fn button(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: "button".to_owned(),
            style: ActionStyle::Default,
            integration: Integration { url: url.into() },
        }
    }

    pub fn style(mut self, style: ActionStyle) -> Self {
        self.style = style;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogElement {
    pub display_name: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subtype: String,
    #[serde(default)]
    pub optional: bool,
}

impl DialogElement {
    pub fn text(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            name: name.into(),
            kind: "text".to_owned(),
            subtype: "text".to_owned(),
            optional: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialog {
    pub callback_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon_url: String,
    pub submit_label: String,
    #[serde(default)]
    pub elements: Vec<DialogElement>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDialogRequest {
    pub trigger_id: String,
    pub url: String,
    pub dialog: Dialog,
}

/// Assembles a [`Post`] from closures, one per attachment.
#[derive(Default)]
pub struct PostBuilder {
    post: Post,
}

impl PostBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.post.message = message.into();
        self
    }

    pub fn poll(mut self, poll_id: impl Into<String>) -> Self {
        self.post.post_type = POLL_POST_TYPE.to_owned();
        self.post.props.poll_id = Some(poll_id.into());
        self
    }

    pub fn card(mut self, card: impl Into<String>) -> Self {
        self.post.props.card = Some(card.into());
        self
    }

    pub fn attachment<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut AttachmentBuilder),
    {
        let mut builder = AttachmentBuilder::default();
        build(&mut builder);
        self.post.props.attachments.push(builder.build());
        self
    }

    pub fn build(self) -> Post {
        self.post
    }
}

#[derive(Default)]
pub struct AttachmentBuilder {
    attachment: Attachment,
}

impl AttachmentBuilder {
    pub fn author(&mut self, name: impl Into<String>) -> &mut Self {
        self.attachment.author_name = name.into();
        self
    }

    pub fn title(&mut self, title: impl Into<String>) -> &mut Self {
        self.attachment.title = title.into();
        self
    }

    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.attachment.text = text.into();
        self
    }

    pub fn short_field(&mut self, title: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.attachment.fields.push(Field { title: title.into(), value: value.into(), short: true });
        self
    }

    pub fn button(&mut self, action: PostAction) -> &mut Self {
        self.attachment.actions.push(action);
        self
    }

    fn build(self) -> Attachment {
        self.attachment
    }
}

impl Post {
    /// Takes over the rendered content of `rendered`, keeping identity and routing fields.
    pub fn replace_content(&mut self, rendered: Post) {
        self.message = rendered.message;
        self.post_type = rendered.post_type;
        self.props = rendered.props;
    }
}
