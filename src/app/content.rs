use std::collections::HashSet;

use leptos::{html::Input, *};
use leptos_use::use_interval_fn;
use wasm_bindgen_futures::JsFuture;

use super::{
    server::{delete_entry, list_entries, submit_draft, DRAFT_PART, FILE_PART, KIND_PART},
    session::use_session,
    use_notices,
};
use crate::portal::{
    form::{DraftField, FormController},
    model::{AttachmentSource, ContentEntry, ContentKind, EntryId, Field, MediaKind},
    preview::{download_name, is_renderable, AttachmentView, PreviewState},
    upload::PendingFile,
};

/// How often an open page refetches its list.
const REFRESH_MS: u64 = 5_000;

async fn read_file(file: web_sys::File) -> Result<PendingFile, String> {
    let buffer = JsFuture::from(file.array_buffer())
        .await
        .map_err(|err| format!("could not read {}: {err:?}", file.name()))?;
    let bytes = js_sys::Uint8Array::new(&buffer).to_vec();

    Ok(PendingFile {
        name: file.name(),
        content_type: file.type_(),
        bytes,
    })
}

fn js_error(err: wasm_bindgen::JsValue) -> String {
    format!("{err:?}")
}

/// Multipart body for `submit_draft`: the draft as JSON, its file as raw bytes.
fn submission(kind: ContentKind, controller: &FormController) -> Result<web_sys::FormData, String> {
    let draft = controller.draft();
    let body = web_sys::FormData::new().map_err(js_error)?;
    let kind = serde_json::to_string(&kind).map_err(|err| err.to_string())?;
    let fields = serde_json::to_string(draft).map_err(|err| err.to_string())?;
    body.append_with_str(KIND_PART, &kind).map_err(js_error)?;
    body.append_with_str(DRAFT_PART, &fields).map_err(js_error)?;

    if let Some(file) = &draft.pending_file {
        let parts = js_sys::Array::of1(&js_sys::Uint8Array::from(file.bytes.as_slice()));
        let mut options = web_sys::BlobPropertyBag::new();
        options.type_(&file.content_type);
        let blob = web_sys::Blob::new_with_u8_array_sequence_and_options(&parts, &options)
            .map_err(js_error)?;
        body.append_with_blob_and_filename(FILE_PART, &blob, &file.name)
            .map_err(js_error)?;
    }
    Ok(body)
}

/// One section of the portal: the live list of entries, the create/edit form
/// and the detail overlay, all driven by the kind's schema.
#[component]
pub fn ContentPage(kind: ContentKind) -> impl IntoView {
    let schema = kind.schema();
    let session = use_session();
    let notices = use_notices();

    let entries = create_resource(|| (), move |_| list_entries(kind));
    // ids removed locally while their delete is in flight
    let deleting = create_rw_signal(HashSet::<EntryId>::new());
    let form = create_rw_signal(FormController::new(schema));
    let preview = create_rw_signal(PreviewState::default());
    let saving = create_rw_signal(false);

    use_interval_fn(move || entries.refetch(), REFRESH_MS);

    let on_delete = move |id: EntryId| {
        let owner = untrack(|| entries.get())
            .and_then(Result::ok)
            .and_then(|list| list.into_iter().find(|entry| entry.id == id))
            .and_then(|entry| entry.created_by);
        if !session.may_modify(schema, owner.as_ref()) {
            notices.error(format!("You are not allowed to change {}", schema.display_name));
            return;
        }

        deleting.update(|ids| {
            ids.insert(id.clone());
        });
        preview.update(|preview| preview.forget(&id));
        spawn_local(async move {
            match delete_entry(kind, id.clone()).await {
                Ok(()) => notices.info("Deleted"),
                Err(err) => notices.server_error(&err),
            }
            // the server keeps a failed delete out of its list until the next snapshot
            entries.refetch();
            deleting.update(|ids| {
                ids.remove(&id);
            });
        });
    };

    let on_edit = move |entry: ContentEntry| {
        form.update(|form| form.open_for_edit(&entry));
    };

    let visible = move || {
        let hidden = deleting.get();
        entries.get().map(|loaded| {
            loaded.map(|list| {
                list.into_iter()
                    .filter(|entry| !hidden.contains(&entry.id))
                    .collect::<Vec<_>>()
            })
        })
    };

    view! {
        <section class="content-page">
            <header>
                <h1>{schema.display_name}</h1>
                <Show when=move || session.may_create(schema)>
                    <button class="primary" on:click=move |_| form.update(|form| form.open_for_create())>
                        {format!("Add {}", schema.display_name)}
                    </button>
                </Show>
            </header>

            <Transition fallback=|| view! { <p class="loading">"Loading..."</p> }>
                {move || visible().map(|loaded| match loaded {
                    Err(err) => view! { <p class="error">{super::server::error_message(&err)}</p> }.into_view(),
                    Ok(list) if list.is_empty() => view! { <p class="empty">"Nothing here yet."</p> }.into_view(),
                    Ok(list) => view! {
                        <ul class="entries">
                            {list.into_iter().map(|entry| view! {
                                <EntryCard kind entry preview on_edit on_delete/>
                            }).collect_view()}
                        </ul>
                    }.into_view(),
                })}
            </Transition>

            <Show when=move || form.with(FormController::is_open)>
                <EntryForm kind form saving on_saved=move || entries.refetch()/>
            </Show>

            <PreviewOverlay kind preview/>
        </section>
    }
}

#[component]
fn EntryCard<E, D>(
    kind: ContentKind,
    entry: ContentEntry,
    preview: RwSignal<PreviewState>,
    on_edit: E,
    on_delete: D,
) -> impl IntoView
where
    E: Fn(ContentEntry) + Copy + 'static,
    D: Fn(EntryId) + Copy + 'static,
{
    let schema = kind.schema();
    let session = use_session();
    let may_modify = session.may_modify(schema, entry.created_by.as_ref());
    let details = entry
        .details
        .clone()
        .zip(schema.details_label)
        .map(|(details, label)| view! { <p class="details"><strong>{label} ": "</strong>{details}</p> });
    let thumbnail = (schema.media == MediaKind::Image)
        .then(|| entry.attachment_url.clone())
        .flatten()
        .filter(|url| is_renderable(url))
        .map(|url| view! { <img class="thumbnail" src=url alt=""/> });

    let selected = entry.clone();
    let edited = entry.clone();
    let id = entry.id.clone();

    view! {
        <li class="entry" on:click=move |_| preview.update(|preview| preview.select(selected.clone()))>
            {thumbnail}
            <h3>{entry.title}</h3>
            <p>{entry.description}</p>
            {details}
            <Show when=move || may_modify>
                <div class="actions">
                    <button on:click={
                        let edited = edited.clone();
                        move |ev| {
                            ev.stop_propagation();
                            on_edit(edited.clone());
                        }
                    }>"Edit"</button>
                    <button class="danger" on:click={
                        let id = id.clone();
                        move |ev| {
                            ev.stop_propagation();
                            on_delete(id.clone());
                        }
                    }>"Delete"</button>
                </div>
            </Show>
        </li>
    }
}

#[component]
fn EntryForm<F>(
    kind: ContentKind,
    form: RwSignal<FormController>,
    saving: RwSignal<bool>,
    on_saved: F,
) -> impl IntoView
where
    F: Fn() + Copy + 'static,
{
    let schema = kind.schema();
    let notices = use_notices();
    let file_input: NodeRef<Input> = create_node_ref();

    let field = move |field: DraftField| {
        move || {
            form.with(|form| {
                let draft = form.draft();
                match field {
                    DraftField::Title => draft.title.clone(),
                    DraftField::Description => draft.description.clone(),
                    DraftField::Details => draft.details.clone(),
                    DraftField::AttachmentUrl => draft.attachment_url.clone(),
                }
            })
        }
    };
    let set = move |field: DraftField| {
        move |ev: ev::Event| {
            let value = event_target_value(&ev);
            form.update(|form| form.update_field(field, value));
        }
    };

    let on_file = move |_: ev::Event| {
        let Some(file) = file_input
            .get_untracked()
            .and_then(|input| input.files())
            .and_then(|files| files.get(0))
        else {
            return;
        };
        spawn_local(async move {
            match read_file(file).await {
                Ok(pending) => form.update(|form| form.attach_file(pending)),
                Err(message) => notices.error(message),
            }
        });
    };

    let on_submit = move |ev: ev::SubmitEvent| {
        ev.prevent_default();
        let controller = form.get_untracked();
        // same checks the server runs, so a bad draft costs no request
        if let Err(err) = controller.validate() {
            notices.error(err.to_string());
            return;
        }

        let body = match submission(kind, &controller) {
            Ok(body) => body,
            Err(message) => {
                notices.error(format!("could not prepare the upload: {message}"));
                return;
            }
        };

        saving.set(true);
        spawn_local(async move {
            match submit_draft(body.into()).await {
                Ok(_) => {
                    form.update(FormController::close);
                    notices.info("Saved");
                    on_saved();
                }
                Err(err) => notices.server_error(&err),
            }
            saving.set(false);
        });
    };

    let attachment = match schema.attachment {
        AttachmentSource::Upload { accept } => view! {
            <label>
                {if schema.requires_attachment() { "File" } else { "File (optional)" }}
                <input type="file" accept=accept node_ref=file_input on:change=on_file/>
            </label>
            {move || form.with(|form| {
                let draft = form.draft();
                match (&draft.pending_file, draft.attachment_url.is_empty()) {
                    (Some(file), _) => Some(format!("Selected: {}", file.name)),
                    (None, false) => Some("Keeping the current file".to_string()),
                    (None, true) => None,
                }
            }).map(|text| view! { <p class="hint">{text}</p> })}
        }
        .into_view(),
        AttachmentSource::Link => view! {
            <label>
                {schema.label(Field::Attachment)}
                <input type="url" placeholder="https://"
                    prop:value=field(DraftField::AttachmentUrl)
                    on:input=set(DraftField::AttachmentUrl)/>
            </label>
        }
        .into_view(),
    };

    view! {
        <div class="modal-backdrop">
            <form class="modal" on:submit=on_submit>
                <h2>
                    {move || if form.with(FormController::is_editing) {
                        format!("Edit {}", schema.display_name)
                    } else {
                        format!("Add {}", schema.display_name)
                    }}
                </h2>
                <label>
                    {schema.title_label}
                    <input type="text" prop:value=field(DraftField::Title) on:input=set(DraftField::Title)/>
                </label>
                <label>
                    {schema.description_label}
                    <textarea prop:value=field(DraftField::Description) on:input=set(DraftField::Description)/>
                </label>
                {schema.details_label.map(|label| view! {
                    <label>
                        {label}
                        <input type="text" prop:value=field(DraftField::Details) on:input=set(DraftField::Details)/>
                    </label>
                })}
                {attachment}
                <div class="actions">
                    <button type="button" on:click=move |_| form.update(FormController::close)>"Cancel"</button>
                    <button type="submit" class="primary" disabled=move || saving.get()>
                        {move || if saving.get() { "Saving..." } else { "Save" }}
                    </button>
                </div>
            </form>
        </div>
    }
}

#[component]
fn PreviewOverlay(kind: ContentKind, preview: RwSignal<PreviewState>) -> impl IntoView {
    let schema = kind.schema();

    let body = move || {
        let entry = preview.with(|preview| preview.selected().cloned())?;
        let attachment = AttachmentView::for_entry(&entry, schema.media).map(|view| match view {
            AttachmentView::Document { url } => view! {
                <iframe class="document" src=url.clone() title="Document preview"></iframe>
                <a class="button" href=url.clone() download=download_name(&url) target="_blank">"Download"</a>
            }
            .into_view(),
            AttachmentView::Image { url } => view! {
                <img class="full" src=url.clone() alt=entry.title.clone()/>
                <a class="button" href=url.clone() download=download_name(&url) target="_blank">"Download"</a>
            }
            .into_view(),
            AttachmentView::Video { embed_url } => view! {
                <iframe class="video" src=embed_url title="Video" allowfullscreen=true></iframe>
            }
            .into_view(),
            AttachmentView::Link { url } => view! {
                <a class="button" href=url target="_blank" rel="noopener">"Open link"</a>
            }
            .into_view(),
        });
        let details = entry.details.clone().zip(schema.details_label);

        Some(view! {
            <div class="modal-backdrop" on:click=move |_| preview.update(PreviewState::clear)>
                <article class="modal preview" on:click=|ev| ev.stop_propagation()>
                    <button class="close" on:click=move |_| preview.update(PreviewState::clear)>"×"</button>
                    <h2>{entry.title.clone()}</h2>
                    <p>{entry.description.clone()}</p>
                    {details.map(|(details, label)| view! { <p><strong>{label} ": "</strong>{details}</p> })}
                    {attachment}
                    <p class="meta">{entry.created_at.format("%d %b %Y").to_string()}</p>
                </article>
            </div>
        })
    };

    view! { {body} }
}
