use leptos::*;
use leptos_router::A;

use super::server::{error_message, profile_overview};
use crate::portal::model::ProfileOverview;

#[component]
pub fn ProfilePage() -> impl IntoView {
    let overview = create_resource(|| (), |_| profile_overview());

    view! {
        <section class="profile">
            <Transition fallback=|| view! { <p class="loading">"Loading..."</p> }>
                {move || overview.get().map(|loaded| match loaded {
                    Ok(Some(overview)) => view! { <Overview overview/> }.into_view(),
                    Ok(None) => view! {
                        <p>"You are not signed in. " <A href="/login">"Log in"</A> " to see your profile."</p>
                    }
                    .into_view(),
                    Err(err) => view! { <p class="error">{error_message(&err)}</p> }.into_view(),
                })}
            </Transition>
        </section>
    }
}

#[component]
fn Overview(overview: ProfileOverview) -> impl IntoView {
    let ProfileOverview { session, activity } = overview;
    let total: usize = activity.iter().map(|a| a.count).sum();

    view! {
        <h1>{session.display_name.clone().unwrap_or_else(|| "Your profile".into())}</h1>
        <p class="email">{session.email}</p>
        <p class="role">{if session.is_admin { "Administrator" } else { "Student" }}</p>

        <h2>"Your activity"</h2>
        {if total == 0 {
            view! { <p class="empty">"You have not posted anything yet."</p> }.into_view()
        } else {
            view! {
                <table class="activity">
                    <tbody>
                        {activity
                            .into_iter()
                            .filter(|a| a.count > 0)
                            .map(|a| view! {
                                <tr>
                                    <td>
                                        <A href=format!("/{}", a.kind.slug())>{a.kind.schema().display_name}</A>
                                    </td>
                                    <td>{a.count}</td>
                                </tr>
                            })
                            .collect_view()}
                    </tbody>
                </table>
            }
            .into_view()
        }}
    }
}
