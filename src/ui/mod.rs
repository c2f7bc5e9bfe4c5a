use leptos::*;
use std::sync::Arc;

use crate::core::config::Config;
use crate::core::credentials::{mask_key, parse_key_list, CredentialManager};
use crate::core::error::{StudioError, ValidationError};
use crate::core::ids;
use crate::core::io::{Storage, WebStorage};
use crate::core::messages::Messages;
use crate::core::repository::{backup_file_name, parse_backup, Repository};
use crate::core::state::{AspectRatio, Character, Story};
use crate::services::failover::ResilientCaller;
use crate::services::gemini::GeminiClient;
use crate::services::mention::{apply_mention, find_mention, suggest};
use crate::services::pipeline::{ProgressState, ScenePipeline, StepStatus, StoryRequest};
use crate::services::studio::StudioService;

#[derive(Clone)]
struct AppServices {
    config: Config,
    messages: Messages,
    credentials: CredentialManager,
    repository: Repository,
    studio: StudioService,
}

async fn init_services() -> anyhow::Result<AppServices> {
    let config = Config::default();
    let storage: Arc<dyn Storage> = Arc::new(WebStorage::new().await?);
    let credentials = CredentialManager::load(&config.data_folder, storage.clone()).await?;
    let repository = Repository::new(&config.data_folder, storage);
    repository.init().await?;

    let client = Arc::new(GeminiClient::new(config.gemini.clone()));
    let studio = StudioService::new(
        ResilientCaller::new(credentials.clone()),
        client,
        config.narration_language(),
    );
    Ok(AppServices {
        messages: config.messages(),
        config,
        credentials,
        repository,
        studio,
    })
}

#[component]
pub fn App() -> impl IntoView {
    let (services, set_services) = create_signal(None::<Result<AppServices, String>>);

    create_effect(move |_| {
        spawn_local(async move {
            let res = init_services().await.map_err(|e| e.to_string());
            set_services.set(Some(res));
        });
    });

    view! {
        <div class="app-container">
            <h1>"Story Studio"</h1>
            {move || match services.get() {
                Some(Ok(s)) => view! { <Studio services=s/> }.into_view(),
                Some(Err(e)) => view! { <p>"Error loading storage: " {e}</p> }.into_view(),
                None => view! { <p>"Loading..."</p> }.into_view()
            }}
        </div>
    }
}

#[component]
fn Studio(services: AppServices) -> impl IntoView {
    let (characters, set_characters) = create_signal(Vec::<Character>::new());
    let (stories, set_stories) = create_signal(Vec::<Story>::new());
    let (notice, set_notice) = create_signal(None::<String>);

    let repository = services.repository.clone();
    let refresh = Callback::new(move |_: ()| {
        let repository = repository.clone();
        spawn_local(async move {
            match repository.characters().await {
                Ok(c) => set_characters.set(c),
                Err(e) => log::error!("Failed to load characters: {:?}", e),
            }
            match repository.stories().await {
                Ok(s) => set_stories.set(s),
                Err(e) => log::error!("Failed to load stories: {:?}", e),
            }
        });
    });
    refresh.call(());

    view! {
        {move || notice.get().map(|n| view! {
            <p class="notice" on:click=move |_| set_notice.set(None)>{n}</p>
        })}
        <KeyPanel credentials=services.credentials.clone()/>
        <CharacterPanel
            services=services.clone()
            characters=characters
            on_change=refresh
            set_notice=set_notice
        />
        <StoryPanel
            services=services.clone()
            characters=characters
            stories=stories
            on_change=refresh
            set_notice=set_notice
        />
        <BackupPanel services=services on_change=refresh set_notice=set_notice/>
    }
}

#[component]
fn KeyPanel(credentials: CredentialManager) -> impl IntoView {
    let (keys, set_keys) = create_signal(credentials.list());
    let (active, set_active) = create_signal(credentials.active());
    let (input, set_input) = create_signal(String::new());

    let sync = {
        let credentials = credentials.clone();
        Callback::new(move |_: ()| {
            set_keys.set(credentials.list());
            set_active.set(credentials.active());
        })
    };

    let on_add = {
        let credentials = credentials.clone();
        move |_| {
            let credentials = credentials.clone();
            let pasted = parse_key_list(&input.get_untracked());
            spawn_local(async move {
                match credentials.add_many(&pasted).await {
                    Ok(added) => log::info!("Added {} API keys", added),
                    Err(e) => log::error!("Failed to add keys: {:?}", e),
                }
                set_input.set(String::new());
                sync.call(());
            });
        }
    };

    view! {
        <section class="keys">
            <h2>"API keys"</h2>
            <textarea
                placeholder="Paste one or more keys"
                prop:value=input
                on:input=move |ev| set_input.set(event_target_value(&ev))
            ></textarea>
            <button on:click=on_add>"Add"</button>
            <ul>
                <For
                    each=move || keys.get()
                    key=|k| k.clone()
                    children=move |k: String| {
                        let activate = {
                            let credentials = credentials.clone();
                            let k = k.clone();
                            move |_| {
                                let credentials = credentials.clone();
                                let k = k.clone();
                                spawn_local(async move {
                                    if let Err(e) = credentials.set_active(&k).await {
                                        log::error!("Failed to save keys: {:?}", e);
                                    }
                                    sync.call(());
                                });
                            }
                        };
                        let remove = {
                            let credentials = credentials.clone();
                            let k = k.clone();
                            move |_| {
                                let credentials = credentials.clone();
                                let k = k.clone();
                                spawn_local(async move {
                                    if let Err(e) = credentials.remove(&k).await {
                                        log::error!("Failed to save keys: {:?}", e);
                                    }
                                    sync.call(());
                                });
                            }
                        };
                        let masked = mask_key(&k);
                        let is_active = move || active.get().as_deref() == Some(k.as_str());
                        view! {
                            <li>
                                {masked}
                                {move || if is_active() { " ✓" } else { "" }}
                                <button on:click=activate>"Use"</button>
                                <button on:click=remove>"Remove"</button>
                            </li>
                        }
                    }
                />
            </ul>
        </section>
    }
}

fn show_error(set_notice: WriteSignal<Option<String>>, messages: &Messages, e: StudioError) {
    log::error!("{:?}", e);
    set_notice.set(Some(e.user_message(messages)));
}

#[component]
fn CharacterPanel(
    services: AppServices,
    characters: ReadSignal<Vec<Character>>,
    on_change: Callback<()>,
    set_notice: WriteSignal<Option<String>>,
) -> impl IntoView {
    let (name, set_name) = create_signal(String::new());
    let (description, set_description) = create_signal(String::new());
    let (ideas, set_ideas) = create_signal(Vec::<String>::new());
    let (busy, set_busy) = create_signal(false);
    let (editing, set_editing) = create_signal(None::<Character>);

    let on_ideas = {
        let services = services.clone();
        move |_| {
            let services = services.clone();
            set_busy.set(true);
            spawn_local(async move {
                match services.studio.character_ideas().await {
                    Ok(list) => set_ideas.set(list),
                    Err(e) => show_error(set_notice, &services.messages, e),
                }
                set_busy.set(false);
            });
        }
    };

    let on_refine = {
        let services = services.clone();
        move |_| {
            let services = services.clone();
            let text = description.get_untracked();
            set_busy.set(true);
            spawn_local(async move {
                match services
                    .studio
                    .refine_text(&text, "a character description for an image generator")
                    .await
                {
                    Ok(refined) => set_description.set(refined),
                    Err(e) => show_error(set_notice, &services.messages, e),
                }
                set_busy.set(false);
            });
        }
    };

    let on_create = {
        let services = services.clone();
        move |_| {
            let services = services.clone();
            let character_name = name.get_untracked().trim().to_string();
            let text = description.get_untracked();
            if character_name.is_empty() {
                set_notice.set(Some(services.messages.validation(&ValidationError::MissingName)));
                return;
            }
            set_busy.set(true);
            spawn_local(async move {
                match services.studio.generate_character_image(&text).await {
                    Ok(image_url) => {
                        let character = Character {
                            id: ids::new_id(),
                            name: character_name,
                            description: text,
                            image_url,
                        };
                        if let Err(e) = services.repository.add_character(&character).await {
                            show_error(set_notice, &services.messages, e.into());
                        } else {
                            set_name.set(String::new());
                            set_description.set(String::new());
                            on_change.call(());
                        }
                    }
                    Err(e) => show_error(set_notice, &services.messages, e),
                }
                set_busy.set(false);
            });
        }
    };

    let repository = services.repository.clone();
    let editor_services = services.clone();

    view! {
        <section class="characters">
            <h2>"Characters"</h2>
            <input
                placeholder="Name"
                prop:value=name
                on:input=move |ev| set_name.set(event_target_value(&ev))
            />
            <textarea
                placeholder="Description"
                prop:value=description
                on:input=move |ev| set_description.set(event_target_value(&ev))
            ></textarea>
            <button on:click=on_ideas disabled=busy>"Ideas"</button>
            <button on:click=on_refine disabled=busy>"Refine"</button>
            <button on:click=on_create disabled=busy>"Create"</button>
            <ul class="ideas">
                {move || ideas.get().into_iter().map(|idea| {
                    let chosen = idea.clone();
                    view! { <li on:click=move |_| set_description.set(chosen.clone())>{idea}</li> }
                }).collect_view()}
            </ul>
            <div class="character-list">
                <For
                    each=move || characters.get()
                    key=|c| c.id.clone()
                    children=move |c: Character| {
                        let repository = repository.clone();
                        let id = c.id.clone();
                        let to_edit = c.clone();
                        let on_edit = move |_| set_editing.set(Some(to_edit.clone()));
                        let on_delete = move |_| {
                            let repository = repository.clone();
                            let id = id.clone();
                            spawn_local(async move {
                                if let Err(e) = repository.delete_character(&id).await {
                                    log::error!("Failed to delete character: {:?}", e);
                                }
                                on_change.call(());
                            });
                        };
                        view! {
                            <div class="character-card">
                                <img src=c.image_url.clone() alt=c.name.clone()/>
                                <h3>{c.name.clone()}</h3>
                                <p>{c.description.clone()}</p>
                                <button on:click=on_edit>"Edit"</button>
                                <button on:click=on_delete>"Delete"</button>
                            </div>
                        }
                    }
                />
            </div>
            <CharacterEditor
                services=editor_services
                editing=editing
                set_editing=set_editing
                on_change=on_change
                set_notice=set_notice
            />
        </section>
    }
}

/// Edits a working copy of a character. The stored record changes on save.
#[component]
fn CharacterEditor(
    services: AppServices,
    editing: ReadSignal<Option<Character>>,
    set_editing: WriteSignal<Option<Character>>,
    on_change: Callback<()>,
    set_notice: WriteSignal<Option<String>>,
) -> impl IntoView {
    let (instruction, set_instruction) = create_signal(String::new());
    let (busy, set_busy) = create_signal(false);

    let field = move |get: fn(&Character) -> String| move || editing.with(|e| e.as_ref().map(get).unwrap_or_default());

    let on_refine = {
        let services = services.clone();
        move |_| {
            let Some(text) = editing.with_untracked(|e| e.as_ref().map(|c| c.description.clone())) else {
                return;
            };
            let services = services.clone();
            set_busy.set(true);
            spawn_local(async move {
                match services
                    .studio
                    .refine_text(&text, "a character description for an image generator")
                    .await
                {
                    Ok(refined) => set_editing.update(|e| {
                        if let Some(c) = e {
                            c.description = refined;
                        }
                    }),
                    Err(e) => show_error(set_notice, &services.messages, e),
                }
                set_busy.set(false);
            });
        }
    };

    let on_regenerate = {
        let services = services.clone();
        move |_| {
            let Some(text) = editing.with_untracked(|e| e.as_ref().map(|c| c.description.clone())) else {
                return;
            };
            let services = services.clone();
            set_busy.set(true);
            spawn_local(async move {
                match services.studio.generate_character_image(&text).await {
                    Ok(image_url) => set_editing.update(|e| {
                        if let Some(c) = e {
                            c.image_url = image_url;
                        }
                    }),
                    Err(e) => show_error(set_notice, &services.messages, e),
                }
                set_busy.set(false);
            });
        }
    };

    let on_edit_image = {
        let services = services.clone();
        move |_| {
            let Some(image_url) = editing.with_untracked(|e| e.as_ref().map(|c| c.image_url.clone())) else {
                return;
            };
            let text = instruction.get_untracked();
            let services = services.clone();
            set_busy.set(true);
            spawn_local(async move {
                match services.studio.edit_character_image(&image_url, &text).await {
                    Ok(edited) => {
                        set_editing.update(|e| {
                            if let Some(c) = e {
                                c.image_url = edited;
                            }
                        });
                        set_instruction.set(String::new());
                    }
                    Err(e) => show_error(set_notice, &services.messages, e),
                }
                set_busy.set(false);
            });
        }
    };

    let on_save = {
        let services = services.clone();
        move |_| {
            let Some(mut character) = editing.get_untracked() else {
                return;
            };
            character.name = character.name.trim().to_string();
            if character.name.is_empty() {
                set_notice.set(Some(services.messages.validation(&ValidationError::MissingName)));
                return;
            }
            let services = services.clone();
            spawn_local(async move {
                match services.repository.update_character(&character).await {
                    Ok(()) => {
                        set_editing.set(None);
                        on_change.call(());
                    }
                    Err(e) => show_error(set_notice, &services.messages, e.into()),
                }
            });
        }
    };

    view! {
        <div
            class="character-editor"
            style:display=move || if editing.with(Option::is_some) { "block" } else { "none" }
        >
            <h3>"Edit character"</h3>
            <img src=field(|c| c.image_url.clone()) alt=field(|c| c.name.clone())/>
            <input
                placeholder="Name"
                prop:value=field(|c| c.name.clone())
                on:input=move |ev| {
                    let value = event_target_value(&ev);
                    set_editing.update(|e| {
                        if let Some(c) = e {
                            c.name = value;
                        }
                    });
                }
            />
            <textarea
                placeholder="Description"
                prop:value=field(|c| c.description.clone())
                on:input=move |ev| {
                    let value = event_target_value(&ev);
                    set_editing.update(|e| {
                        if let Some(c) = e {
                            c.description = value;
                        }
                    });
                }
            ></textarea>
            <button on:click=on_refine disabled=busy>"Refine"</button>
            <button on:click=on_regenerate disabled=busy>"Regenerate portrait"</button>
            <input
                placeholder="What should change in the image?"
                prop:value=instruction
                on:input=move |ev| set_instruction.set(event_target_value(&ev))
            />
            <button on:click=on_edit_image disabled=busy>"Edit image"</button>
            <button on:click=on_save disabled=busy>"Save"</button>
            <button on:click=move |_| set_editing.set(None)>"Cancel"</button>
        </div>
    }
}

#[component]
fn ProgressView(progress: ReadSignal<Option<ProgressState>>) -> impl IntoView {
    move || {
        progress.get().map(|p| {
            let rows = p
                .steps
                .iter()
                .enumerate()
                .map(|(i, step)| {
                    let mark = match p.status(i) {
                        Some(StepStatus::Completed) => "✓",
                        Some(StepStatus::InProgress) => "…",
                        Some(StepStatus::Failed) => "✗",
                        _ => "·",
                    };
                    view! { <li>{mark} " " {step.clone()}</li> }
                })
                .collect_view();
            view! {
                <div class="progress">
                    <h3>{p.title.clone()}</h3>
                    <ol>{rows}</ol>
                    {p.error_message.clone().map(|e| view! { <p class="error">{e}</p> })}
                </div>
            }
        })
    }
}

#[component]
fn StoryPanel(
    services: AppServices,
    characters: ReadSignal<Vec<Character>>,
    stories: ReadSignal<Vec<Story>>,
    on_change: Callback<()>,
    set_notice: WriteSignal<Option<String>>,
) -> impl IntoView {
    let defaults = services.config.pipeline.clone();
    let (name, set_name) = create_signal(String::new());
    let (prompt, set_prompt) = create_signal(String::new());
    let (selected, set_selected) = create_signal(Vec::<String>::new());
    let (aspect, set_aspect) = create_signal(defaults.default_aspect_ratio);
    let (video_duration, set_video_duration) = create_signal(defaults.default_video_duration);
    let (scene_duration, set_scene_duration) = create_signal(defaults.default_scene_duration);
    let (progress, set_progress) = create_signal(None::<ProgressState>);
    let (busy, set_busy) = create_signal(false);

    let selected_characters = move || {
        let ids = selected.get();
        characters
            .get()
            .into_iter()
            .filter(|c| ids.contains(&c.id))
            .collect::<Vec<_>>()
    };

    let mention_suggestions = move || {
        let text = prompt.get();
        let chosen = selected_characters();
        match find_mention(&text, text.len()) {
            Some(mention) => suggest(&mention, &chosen)
                .into_iter()
                .map(|c| c.name.clone())
                .collect::<Vec<_>>(),
            None => Vec::new(),
        }
    };

    let on_idea = {
        let services = services.clone();
        move |_| {
            let services = services.clone();
            set_busy.set(true);
            spawn_local(async move {
                match services.studio.story_ideas().await {
                    Ok(ideas) => {
                        if let Some(first) = ideas.into_iter().next() {
                            set_prompt.set(first);
                        }
                    }
                    Err(e) => show_error(set_notice, &services.messages, e),
                }
                set_busy.set(false);
            });
        }
    };

    let on_refine = {
        let services = services.clone();
        move |_| {
            let services = services.clone();
            let text = prompt.get_untracked();
            set_busy.set(true);
            spawn_local(async move {
                match services.studio.refine_story_prompt(&text).await {
                    Ok(refined) => set_prompt.set(refined),
                    Err(e) => show_error(set_notice, &services.messages, e),
                }
                set_busy.set(false);
            });
        }
    };

    let on_create = {
        let services = services.clone();
        move |_| {
            let services = services.clone();
            let ids = selected.get_untracked();
            let request = StoryRequest {
                name: name.get_untracked(),
                prompt: prompt.get_untracked(),
                characters: characters
                    .get_untracked()
                    .into_iter()
                    .filter(|c| ids.contains(&c.id))
                    .collect(),
                aspect_ratio: aspect.get_untracked(),
                video_duration: video_duration.get_untracked(),
                scene_duration: scene_duration.get_untracked(),
            };
            set_busy.set(true);
            spawn_local(async move {
                let pipeline = ScenePipeline::new(
                    services.studio.clone(),
                    services.messages,
                    services.config.pipeline.max_scenes,
                );
                let mut sink = move |p: &ProgressState| set_progress.set(Some(p.clone()));
                match pipeline.run(&request, &mut sink).await {
                    Ok(story) => {
                        set_progress.set(None);
                        if let Err(e) = services.repository.add_story(&story).await {
                            show_error(set_notice, &services.messages, e.into());
                        }
                        on_change.call(());
                    }
                    Err(failure) if failure.progress.is_none() => {
                        show_error(set_notice, &services.messages, failure.error);
                    }
                    Err(failure) => log::error!("Story generation failed: {}", failure),
                }
                set_busy.set(false);
            });
        }
    };

    let repository = services.repository.clone();
    let messages = services.messages;

    view! {
        <section class="stories">
            <h2>"Stories"</h2>
            <input
                placeholder="Story name"
                prop:value=name
                on:input=move |ev| set_name.set(event_target_value(&ev))
            />
            <div class="character-picker">
                {move || characters.get().into_iter().map(|c| {
                    let id = c.id.clone();
                    let checked_id = c.id.clone();
                    view! {
                        <label>
                            <input
                                type="checkbox"
                                prop:checked=move || selected.get().contains(&checked_id)
                                on:change=move |_| set_selected.update(|ids| {
                                    if let Some(pos) = ids.iter().position(|x| *x == id) {
                                        ids.remove(pos);
                                    } else {
                                        ids.push(id.clone());
                                    }
                                })
                            />
                            {c.name.clone()}
                        </label>
                    }
                }).collect_view()}
            </div>
            <textarea
                placeholder="Story, use @ to mention a selected character"
                prop:value=prompt
                on:input=move |ev| set_prompt.set(event_target_value(&ev))
            ></textarea>
            <ul class="mentions">
                {move || mention_suggestions().into_iter().map(|n| {
                    let chosen = n.clone();
                    let pick = move |_| {
                        let text = prompt.get_untracked();
                        if let Some(m) = find_mention(&text, text.len()) {
                            let (updated, _) = apply_mention(&text, &m, text.len(), &chosen);
                            set_prompt.set(updated);
                        }
                    };
                    view! { <li on:click=pick>{n}</li> }
                }).collect_view()}
            </ul>
            <select on:change=move |ev| {
                if let Ok(ar) = event_target_value(&ev).parse::<AspectRatio>() {
                    set_aspect.set(ar);
                }
            }>
                {AspectRatio::ALL.into_iter().map(|ar| view! {
                    <option value=ar.as_str() selected=move || aspect.get() == ar>{ar.as_str()}</option>
                }).collect_view()}
            </select>
            <input
                type="number"
                prop:value=move || video_duration.get().to_string()
                on:input=move |ev| set_video_duration.set(event_target_value(&ev).parse().unwrap_or(0))
            />
            <input
                type="number"
                prop:value=move || scene_duration.get().to_string()
                on:input=move |ev| set_scene_duration.set(event_target_value(&ev).parse().unwrap_or(0))
            />
            <button on:click=on_idea disabled=busy>"Idea"</button>
            <button on:click=on_refine disabled=busy>"Refine"</button>
            <button on:click=on_create disabled=busy>"Create story"</button>
            <ProgressView progress=progress/>
            <button on:click=move |_| set_progress.set(None)>"Dismiss"</button>
            <For
                each=move || stories.get()
                key=|s| s.id.clone()
                children=move |s: Story| {
                    let repository = repository.clone();
                    let id = s.id.clone();
                    let on_delete = move |_| {
                        let repository = repository.clone();
                        let id = id.clone();
                        spawn_local(async move {
                            if let Err(e) = repository.delete_story(&id).await {
                                log::error!("Failed to delete story: {:?}", e);
                            }
                            on_change.call(());
                        });
                    };
                    let scenes = s.scenes.iter().enumerate().map(|(i, scene)| view! {
                        <div class="scene">
                            <img src=scene.image_url.clone()/>
                            <h4>{messages.scene_heading(i + 1)}</h4>
                            <p>{scene.voiceover_prompt.clone()}</p>
                            <small>{scene.animation_prompt.clone()}</small>
                        </div>
                    }).collect_view();
                    view! {
                        <article class="story">
                            <h3>{s.name.clone()} " (" {s.aspect_ratio.as_str()} ")"</h3>
                            {scenes}
                            <button on:click=on_delete>"Delete"</button>
                        </article>
                    }
                }
            />
        </section>
    }
}

#[component]
fn BackupPanel(
    services: AppServices,
    on_change: Callback<()>,
    set_notice: WriteSignal<Option<String>>,
) -> impl IntoView {
    let (text, set_text) = create_signal(String::new());

    let on_export = {
        let repository = services.repository.clone();
        move |_| {
            let repository = repository.clone();
            spawn_local(async move {
                match repository.export_all().await {
                    Ok(backup) => match serde_json::to_string_pretty(&backup) {
                        Ok(json) => {
                            set_text.set(json);
                            set_notice.set(Some(backup_file_name(ids::now())));
                        }
                        Err(e) => log::error!("Failed to serialize backup: {:?}", e),
                    },
                    Err(e) => log::error!("Failed to export: {:?}", e),
                }
            });
        }
    };

    let on_import = {
        let services = services.clone();
        move |_| {
            let services = services.clone();
            let json = text.get_untracked();
            spawn_local(async move {
                let result = match parse_backup(&json) {
                    Ok(backup) => services.repository.import_all(&backup).await.map_err(StudioError::from),
                    Err(e) => Err(e),
                };
                match result {
                    Ok(written) => log::info!("Imported {} records", written),
                    Err(e) => show_error(set_notice, &services.messages, e),
                }
                on_change.call(());
            });
        }
    };

    view! {
        <section class="backup">
            <h2>"Backup"</h2>
            <textarea
                prop:value=text
                on:input=move |ev| set_text.set(event_target_value(&ev))
            ></textarea>
            <button on:click=on_export>"Export"</button>
            <button on:click=on_import>"Import"</button>
        </section>
    }
}
