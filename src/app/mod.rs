pub mod assistant;
pub mod auth;
#[cfg(feature = "ssr")]
pub mod backend;
pub mod content;
pub mod profile;
pub mod server;
pub mod session;

use std::time::Duration;

use leptos::*;
use leptos_meta::*;
use leptos_router::*;

use self::{
    assistant::AssistantPage,
    auth::{LoginPage, ResetPage, SignupPage},
    content::ContentPage,
    profile::ProfilePage,
    server::{error_message, sign_out},
    session::{use_session, SessionContext},
};
use crate::{
    error_template::{AppError, ErrorTemplate},
    portal::model::ContentKind,
};

const NOTICE_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    id: u32,
    text: String,
    error: bool,
}

/// Transient messages shown at the bottom of the page.
#[derive(Clone, Copy)]
pub struct Notices(RwSignal<Option<Notice>>);

impl Notices {
    fn provide() -> Self {
        let notices = Self(create_rw_signal(None));
        provide_context(notices);
        notices
    }

    pub fn info(&self, text: impl Into<String>) {
        self.show(text.into(), false);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.show(text.into(), true);
    }

    pub fn server_error(&self, err: &ServerFnError) {
        self.error(error_message(err));
    }

    fn show(&self, text: String, error: bool) {
        let notices = self.0;
        let id = notices.with_untracked(|current| current.as_ref().map_or(0, |n| n.id + 1));
        notices.set(Some(Notice { id, text, error }));
        set_timeout(
            move || notices.update(|current| {
                if current.as_ref().is_some_and(|n| n.id == id) {
                    *current = None;
                }
            }),
            NOTICE_TIMEOUT,
        );
    }
}

pub fn use_notices() -> Notices {
    expect_context()
}

#[component]
pub fn App() -> impl IntoView {
    // Provides context that manages stylesheets, titles, meta tags, etc.
    provide_meta_context();
    let session = SessionContext::provide();
    let notices = Notices::provide();
    let ready = create_memo(move |_| session.is_resolved());

    view! {
        // id=leptos means cargo-leptos will hot-reload this stylesheet
        <Stylesheet id="leptos" href="/pkg/campus-portal.css"/>
        <Title text="Campus Portal"/>

        <Router fallback=|| {
            let mut outside_errors = Errors::default();
            outside_errors.insert_with_default_key(AppError::NotFound);
            view! {
                <ErrorTemplate outside_errors/>
            }
            .into_view()
        }>
            <Transition fallback=Loading>
                // registers the session read with this transition
                {move || session.state().session().map(|_| ())}
                <Show when=move || ready.get() fallback=Loading>
                    <Nav/>
                    <main>
                        <Routes>
                            <Route path="" view=HomePage/>
                            <Route path="/login" view=LoginPage/>
                            <Route path="/signup" view=SignupPage/>
                            <Route path="/reset" view=ResetPage/>
                            <Route path="/profile" view=ProfilePage/>
                            <Route path="/assistant" view=AssistantPage/>
                            <Route path="/notes" view=|| view! { <ContentPage kind=ContentKind::Notes/> }/>
                            <Route path="/papers" view=|| view! { <ContentPage kind=ContentKind::PreviousPapers/> }/>
                            <Route path="/forums" view=|| view! { <ContentPage kind=ContentKind::Forums/> }/>
                            <Route path="/lectures" view=|| view! { <ContentPage kind=ContentKind::LectureVideos/> }/>
                            <Route path="/mock-tests" view=|| view! { <ContentPage kind=ContentKind::MockTests/> }/>
                            <Route path="/faculty" view=|| view! { <ContentPage kind=ContentKind::Faculty/> }/>
                            <Route path="/lost-found" view=|| view! { <ContentPage kind=ContentKind::LostFound/> }/>
                        </Routes>
                    </main>
                </Show>
            </Transition>
            {move || notices.0.get().map(|notice| view! {
                <div class="notice" class:error=notice.error>{notice.text}</div>
            })}
        </Router>
    }
}

#[component]
fn Loading() -> impl IntoView {
    view! { <p class="loading">"Loading..."</p> }
}

#[component]
fn Nav() -> impl IntoView {
    let session = use_session();
    let notices = use_notices();
    let navigate = use_navigate();

    let on_sign_out = move |_: ev::MouseEvent| {
        let navigate = navigate.clone();
        spawn_local(async move {
            match sign_out().await {
                Ok(()) => {
                    session.refresh();
                    notices.info("Signed out");
                    navigate("/", Default::default());
                }
                Err(err) => notices.server_error(&err),
            }
        });
    };

    view! {
        <nav>
            <A href="/" class="brand">"Campus Portal"</A>
            <ul>
                {ContentKind::ALL
                    .into_iter()
                    .map(|kind| view! {
                        <li><A href=format!("/{}", kind.slug())>{kind.schema().display_name}</A></li>
                    })
                    .collect_view()}
                <li><A href="/assistant">"Assistant"</A></li>
            </ul>
            {move || match session.session() {
                Some(current) => view! {
                    <div class="account">
                        <A href="/profile">
                            {current.display_name.clone().unwrap_or(current.email.clone())}
                        </A>
                        {current.is_admin.then(|| view! { <span class="badge">"admin"</span> })}
                        <button on:click=on_sign_out.clone()>"Sign out"</button>
                    </div>
                }
                .into_view(),
                None => view! {
                    <div class="account">
                        <A href="/login">"Log in"</A>
                        <A href="/signup">"Sign up"</A>
                    </div>
                }
                .into_view(),
            }}
        </nav>
    }
}

fn blurb(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Notes => "Lecture notes for every subject, as PDFs.",
        ContentKind::PreviousPapers => "Past exam papers by subject and regulation.",
        ContentKind::Forums => "Announcements and posters from clubs and departments.",
        ContentKind::LectureVideos => "Recorded lectures and video playlists.",
        ContentKind::MockTests => "Practice tests to prepare for exams.",
        ContentKind::Faculty => "Who teaches what, and how to reach them.",
        ContentKind::LostFound => "Lost something on campus? Found something?",
    }
}

/// Landing page with one card per section.
#[component]
fn HomePage() -> impl IntoView {
    let session = use_session();

    view! {
        <section class="home">
            <h1>
                {move || match session.session().and_then(|s| s.display_name) {
                    Some(name) => format!("Welcome back, {name}"),
                    None => "Welcome to the campus portal".to_string(),
                }}
            </h1>
            <div class="cards">
                {ContentKind::ALL
                    .into_iter()
                    .map(|kind| view! {
                        <A href=format!("/{}", kind.slug()) class="card">
                            <h2>{kind.schema().display_name}</h2>
                            <p>{blurb(kind)}</p>
                        </A>
                    })
                    .collect_view()}
                <A href="/assistant" class="card">
                    <h2>"Assistant"</h2>
                    <p>"Ask questions about campus life."</p>
                </A>
            </div>
        </section>
    }
}
