use http::status::StatusCode;
use leptos::*;
use leptos_router::A;
use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum AppError {
    #[error("Page not found")]
    NotFound,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

/// Renders routing errors. Sets the response status when rendered on the server.
#[component]
pub fn ErrorTemplate(
    #[prop(optional)] outside_errors: Option<Errors>,
    #[prop(optional)] errors: Option<RwSignal<Errors>>,
) -> impl IntoView {
    let errors = match (outside_errors, errors) {
        (Some(outside), _) => outside,
        (None, Some(errors)) => errors.get_untracked(),
        (None, None) => Errors::default(),
    };
    let errors: Vec<AppError> = errors
        .into_iter()
        .filter_map(|(_key, err)| err.downcast_ref::<AppError>().cloned())
        .collect();
    tracing::debug!(?errors, "rendering error page");

    #[cfg(feature = "ssr")]
    {
        use leptos_axum::ResponseOptions;
        if let (Some(response), Some(first)) = (use_context::<ResponseOptions>(), errors.first()) {
            response.set_status(first.status_code());
        }
    }

    view! {
        <section class="error-page">
            <h1>{if errors.len() > 1 { "Errors" } else { "Error" }}</h1>
            <For
                each=move || errors.clone().into_iter().enumerate()
                key=|(index, _error)| *index
                children=move |(_, error)| {
                    view! {
                        <h2>{error.status_code().to_string()}</h2>
                        <p>{error.to_string()}</p>
                    }
                }
            />
            <A href="/">"Back to the portal"</A>
        </section>
    }
}
