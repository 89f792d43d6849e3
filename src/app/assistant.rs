use leptos::*;

use super::{server::ask_assistant, use_notices};
use crate::portal::chat::{Conversation, Speaker};

#[component]
pub fn AssistantPage() -> impl IntoView {
    let notices = use_notices();
    let conversation = create_rw_signal(Conversation::default());
    let input = create_rw_signal(String::new());
    let waiting = create_rw_signal(false);

    let on_send = move |ev: ev::SubmitEvent| {
        ev.prevent_default();
        if waiting.get_untracked() {
            return;
        }

        let mut next = conversation.get_untracked();
        if let Err(err) = next.push_user(&input.get_untracked()) {
            notices.error(err.to_string());
            return;
        }
        let history = next.messages().to_vec();
        conversation.set(next);
        input.set(String::new());
        waiting.set(true);

        spawn_local(async move {
            match ask_assistant(history).await {
                Ok(reply) => conversation.update(|c| c.push_reply(reply.text)),
                Err(err) => notices.server_error(&err),
            }
            waiting.set(false);
        });
    };

    view! {
        <section class="assistant">
            <h1>"Campus assistant"</h1>
            <ol class="messages">
                {move || conversation.with(|c| {
                    c.messages()
                        .iter()
                        .map(|message| {
                            let from_user = message.speaker == Speaker::User;
                            view! {
                                <li class:user=from_user class:bot=!from_user>{message.text.clone()}</li>
                            }
                        })
                        .collect_view()
                })}
                <Show when=move || waiting.get()>
                    <li class="bot typing">"..."</li>
                </Show>
            </ol>
            <form class="composer" on:submit=on_send>
                <input
                    type="text"
                    placeholder="Ask something"
                    prop:value=input
                    on:input=move |ev| input.set(event_target_value(&ev))
                />
                <button type="submit" class="primary" disabled=waiting>"Send"</button>
            </form>
        </section>
    }
}
