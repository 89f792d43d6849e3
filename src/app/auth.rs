use leptos::*;
use leptos_router::{use_navigate, A};

use super::{
    server::{reset_password, sign_in, sign_up},
    session::use_session,
    use_notices,
};
use crate::portal::{error::ValidationError, session::validate_institutional_email};

fn bound_input(signal: RwSignal<String>) -> impl Fn(ev::Event) + Copy {
    move |ev| signal.set(event_target_value(&ev))
}

#[component]
pub fn LoginPage() -> impl IntoView {
    let session = use_session();
    let notices = use_notices();
    let navigate = use_navigate();
    let email = create_rw_signal(String::new());
    let password = create_rw_signal(String::new());
    let pending = create_rw_signal(false);

    let on_submit = move |ev: ev::SubmitEvent| {
        ev.prevent_default();
        if let Err(err) = validate_institutional_email(&email.get_untracked()) {
            notices.error(err.to_string());
            return;
        }

        pending.set(true);
        let navigate = navigate.clone();
        spawn_local(async move {
            match sign_in(email.get_untracked(), password.get_untracked()).await {
                Ok(signed_in) => {
                    session.refresh();
                    notices.info(format!(
                        "Signed in as {}",
                        signed_in.display_name.unwrap_or(signed_in.email)
                    ));
                    navigate("/", Default::default());
                }
                Err(err) => notices.server_error(&err),
            }
            pending.set(false);
        });
    };

    view! {
        <section class="auth">
            <h1>"Log in"</h1>
            <form on:submit=on_submit>
                <label>
                    "College email"
                    <input type="email" placeholder="you@vbithyd.ac.in" prop:value=email on:input=bound_input(email)/>
                </label>
                <label>
                    "Password"
                    <input type="password" prop:value=password on:input=bound_input(password)/>
                </label>
                <button type="submit" class="primary" disabled=pending>"Log in"</button>
            </form>
            <p><A href="/reset">"Forgot your password?"</A></p>
            <p>"New here? " <A href="/signup">"Create an account"</A></p>
        </section>
    }
}

#[component]
pub fn SignupPage() -> impl IntoView {
    let session = use_session();
    let notices = use_notices();
    let navigate = use_navigate();
    let first_name = create_rw_signal(String::new());
    let email = create_rw_signal(String::new());
    let password = create_rw_signal(String::new());
    let confirm_password = create_rw_signal(String::new());
    let pending = create_rw_signal(false);

    let on_submit = move |ev: ev::SubmitEvent| {
        ev.prevent_default();
        let checked = if password.get_untracked() != confirm_password.get_untracked() {
            Err(ValidationError::PasswordMismatch)
        } else {
            validate_institutional_email(&email.get_untracked())
        };
        if let Err(err) = checked {
            notices.error(err.to_string());
            return;
        }

        pending.set(true);
        let navigate = navigate.clone();
        spawn_local(async move {
            let result = sign_up(
                first_name.get_untracked(),
                email.get_untracked(),
                password.get_untracked(),
                confirm_password.get_untracked(),
            )
            .await;
            match result {
                Ok(_) => {
                    session.refresh();
                    notices.info("Account created. Check your inbox to verify your email.");
                    navigate("/", Default::default());
                }
                Err(err) => notices.server_error(&err),
            }
            pending.set(false);
        });
    };

    view! {
        <section class="auth">
            <h1>"Sign up"</h1>
            <form on:submit=on_submit>
                <label>
                    "First name"
                    <input type="text" prop:value=first_name on:input=bound_input(first_name)/>
                </label>
                <label>
                    "College email"
                    <input type="email" placeholder="you@vbithyd.ac.in" prop:value=email on:input=bound_input(email)/>
                </label>
                <label>
                    "Password"
                    <input type="password" prop:value=password on:input=bound_input(password)/>
                </label>
                <label>
                    "Confirm password"
                    <input type="password" prop:value=confirm_password on:input=bound_input(confirm_password)/>
                </label>
                <button type="submit" class="primary" disabled=pending>"Sign up"</button>
            </form>
            <p>"Already registered? " <A href="/login">"Log in"</A></p>
        </section>
    }
}

#[component]
pub fn ResetPage() -> impl IntoView {
    let notices = use_notices();
    let email = create_rw_signal(String::new());
    let sent = create_rw_signal(false);

    let on_submit = move |ev: ev::SubmitEvent| {
        ev.prevent_default();
        if let Err(err) = validate_institutional_email(&email.get_untracked()) {
            notices.error(err.to_string());
            return;
        }
        spawn_local(async move {
            match reset_password(email.get_untracked()).await {
                Ok(()) => sent.set(true),
                Err(err) => notices.server_error(&err),
            }
        });
    };

    view! {
        <section class="auth">
            <h1>"Reset password"</h1>
            <Show
                when=move || sent.get()
                fallback=move || view! {
                    <form on:submit=on_submit>
                        <label>
                            "College email"
                            <input type="email" prop:value=email on:input=bound_input(email)/>
                        </label>
                        <button type="submit" class="primary">"Send reset link"</button>
                    </form>
                }
            >
                <p>"If that address has an account, a reset link is on its way."</p>
            </Show>
            <p><A href="/login">"Back to log in"</A></p>
        </section>
    }
}
