// SPDX-License-Identifier: MIT OR Apache-2.0
//! Builds the single `messages` array the Converse contract sends (§4.4).

use serde_json::{json, Value};

use crate::{ConverseImage, ConverseRequest};

fn image_block(image: &ConverseImage) -> Value {
    json!({
        "image": {
            "format": image.format.wire_tag(),
            "source": { "bytes": image.base64 },
        }
    })
}

/// Build the `messages` array for `request`.
///
/// Turn-1 (no `prior_turn`): one user message carrying the prompt text and
/// attached images. Turn-2 (`prior_turn` present): the Turn-1 user message,
/// the Turn-1 assistant reply, then the Turn-2 user message — so Turn-2
/// always observes the full Turn-1 context.
pub fn build_messages(request: &ConverseRequest) -> Value {
    let mut messages = Vec::new();

    if let Some(prior) = &request.prior_turn {
        let mut prior_content = vec![json!({ "text": prior.user_prompt })];
        prior_content.push(image_block(&prior.user_image));
        messages.push(json!({ "role": "user", "content": prior_content }));
        messages.push(json!({
            "role": "assistant",
            "content": [{ "text": prior.assistant_reply }],
        }));
    }

    let mut current_content = vec![json!({ "text": request.user_prompt })];
    current_content.extend(request.images.iter().map(image_block));
    messages.push(json!({ "role": "user", "content": current_content }));

    Value::Array(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vv_core::ImageFormat;

    fn image() -> ConverseImage {
        ConverseImage {
            base64: "iVBORw0KGgoAAAA".into(),
            format: ImageFormat::Png,
        }
    }

    #[test]
    fn turn1_has_single_user_message() {
        let request = ConverseRequest {
            system_prompt: "sys".into(),
            user_prompt: "describe the planogram".into(),
            images: vec![image()],
            prior_turn: None,
        };
        let messages = build_messages(&request);
        let array = messages.as_array().unwrap();
        assert_eq!(array.len(), 1);
        assert_eq!(array[0]["role"], "user");
    }

    #[test]
    fn turn2_replays_turn1_then_appends_current() {
        let request = ConverseRequest {
            system_prompt: "sys".into(),
            user_prompt: "compare the checking image".into(),
            images: vec![image()],
            prior_turn: Some(crate::PriorTurn {
                system_prompt: "sys".into(),
                user_prompt: "describe the planogram".into(),
                user_image: image(),
                assistant_reply: "ten positions labeled".into(),
            }),
        };
        let messages = build_messages(&request);
        let array = messages.as_array().unwrap();
        assert_eq!(array.len(), 3);
        assert_eq!(array[0]["role"], "user");
        assert_eq!(array[1]["role"], "assistant");
        assert_eq!(array[2]["role"], "user");
        assert_eq!(array[1]["content"][0]["text"], "ten positions labeled");
    }
}
