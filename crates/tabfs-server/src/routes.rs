//! The tab and window hierarchy.
//!
//! ```text
//! /tabs/create                        write a URL to open a tab
//! /tabs/by-id/#TAB_ID/...             one directory per tab
//! /tabs/by-title/:TAB_TITLE.#TAB_ID   symlinks into by-id
//! /tabs/by-window/#TAB_WINDOW_ID.:TAB_TITLE.#TAB_ID
//!                                     symlinks into by-id, grouped by window
//! /tabs/last-focused                  symlink into by-id
//! /windows/#WINDOW_ID/...             one directory per window
//! /windows/last-focused               symlink to a window directory
//! /runtime/reload                     write to reload the browser side
//! /runtime/routes.html                this hierarchy, documented
//! ```
//!
//! Directories that only group other routes (`/`, `/tabs`,
//! `/tabs/by-id/#TAB_ID`, `/windows/#WINDOW_ID`, `/runtime`) are not
//! declared here; the route table synthesizes them.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;

use strum::IntoEnumIterator;
use tabfs_kernel::{
    Attr, ContentRoute, FsError, FsResult, MemoryHandleCache, OpRequest, RouteSpec, RouteTable,
    RouteTableBuilder, RouteTableError, SharedHandleCache, WritableDirectory, content_route,
    listing, mode, sanitize,
};

use crate::browser::{SharedBrowser, Tab, TabCommand, TabUpdate, Window};

/// Size reported for screenshots, which are too expensive to capture just
/// to answer `getattr`.
const SCREENSHOT_REPORTED_SIZE: u64 = 10_000_000;

/// Suffix of the files evaluation results are written to.
const RESULT_SUFFIX: &str = ".result";

fn tab_id(req: &OpRequest) -> FsResult<i64> {
    req.vars.int("tabId")
}

fn window_id(req: &OpRequest) -> FsResult<i64> {
    req.vars.int("windowId")
}

/// `<sanitized title>.<id>`, the name of a tab's symlink.
fn link_name(tab: &Tab) -> String {
    format!("{}.{}", sanitize(&tab.title), tab.id)
}

/// `<sanitized window id and title>.<id>`, the name of a tab's by-window
/// symlink.
fn window_link_name(tab: &Tab) -> String {
    format!("{}.{}", sanitize(&format!("{}.{}", tab.window_id, tab.title)), tab.id)
}

/// `true\n` / `false\n`.
fn flag(value: bool) -> String {
    format!("{value}\n")
}

/// Written flags only need to start with `true`: overwriting `false` with
/// `true` without truncating leaves `truee`.
fn parse_flag(text: &str) -> bool {
    text.starts_with("true")
}

/// Read-only file over one tab's properties.
fn tab_file(handles: &SharedHandleCache, browser: &SharedBrowser, read: fn(&Tab) -> String) -> ContentRoute {
    let browser = Arc::clone(browser);
    content_route(handles, move |req: OpRequest| {
        let browser = Arc::clone(&browser);
        async move {
            let tab = browser.tab(tab_id(&req)?).await?;
            Ok(read(&tab))
        }
    })
}

/// Read-write file over one tab's properties.
fn tab_setting(
    handles: &SharedHandleCache,
    browser: &SharedBrowser,
    read: fn(&Tab) -> String,
    write: fn(&str) -> TabUpdate,
) -> ContentRoute {
    let setter = Arc::clone(browser);
    tab_file(handles, browser, read).writable(move |req, text| {
        let browser = Arc::clone(&setter);
        async move {
            browser.update_tab(tab_id(&req)?, write(&text)).await?;
            Ok(())
        }
    })
}

/// Read-write file over one window's properties.
fn window_setting(
    handles: &SharedHandleCache,
    browser: &SharedBrowser,
    read: fn(&Window) -> String,
    write: fn(&str) -> bool,
) -> ContentRoute {
    let getter = Arc::clone(browser);
    let setter = Arc::clone(browser);
    content_route(handles, move |req: OpRequest| {
        let browser = Arc::clone(&getter);
        async move {
            let window = browser.window(window_id(&req)?).await?;
            Ok(read(&window))
        }
    })
    .writable(move |req, text| {
        let browser = Arc::clone(&setter);
        async move {
            browser.set_window_focused(window_id(&req)?, write(&text)).await?;
            Ok(())
        }
    })
}

/// Symlink from a tab's title entry to its by-id directory; `rm` closes the tab.
fn tab_link(browser: &SharedBrowser, prefix: &'static str) -> RouteSpec {
    let browser = Arc::clone(browser);
    RouteSpec::new()
        .readlink(move |req| async move { Ok(format!("{prefix}{}", tab_id(&req)?)) })
        .unlink(move |req| {
            let browser = Arc::clone(&browser);
            async move {
                browser.remove_tab(tab_id(&req)?).await?;
                Ok(())
            }
        })
        .usage("rm $0")
}

/// Tab and expression of a `watches/:EXPR` request.
fn watch_key(req: &OpRequest) -> FsResult<(i64, &str)> {
    Ok((tab_id(req)?, req.vars.str("expr")?))
}

/// Watch expressions registered per tab.
#[derive(Debug, Clone, Default)]
struct Watches(Arc<Mutex<IndexMap<i64, IndexSet<String>>>>);

impl Watches {
    fn add(&self, tab: i64, expr: &str) {
        self.0.lock().entry(tab).or_default().insert(expr.to_string());
    }

    fn remove(&self, tab: i64, expr: &str) -> bool {
        let mut watches = self.0.lock();
        let Some(exprs) = watches.get_mut(&tab) else {
            return false;
        };
        let removed = exprs.shift_remove(expr);
        if exprs.is_empty() {
            watches.shift_remove(&tab);
        }
        removed
    }

    fn contains(&self, tab: i64, expr: &str) -> bool {
        self.0.lock().get(&tab).is_some_and(|exprs| exprs.contains(expr))
    }

    fn list(&self, tab: i64) -> Vec<String> {
        self.0
            .lock()
            .get(&tab)
            .map(|exprs| exprs.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Declare every tab, window and runtime route on `builder`.
pub fn declare_routes(builder: &mut RouteTableBuilder, browser: &SharedBrowser) {
    let handles = builder.handles();
    declare_tab_routes(builder, browser);
    declare_tab_files(builder, &handles, browser);
    declare_tab_scripting(builder, &handles, browser);
    declare_window_routes(builder, &handles, browser);
    declare_runtime_routes(builder, browser);
}

/// Build the complete route table over `browser`.
pub fn build_table(browser: SharedBrowser) -> Result<RouteTable, RouteTableError> {
    build_table_with_handles(browser, MemoryHandleCache::shared())
}

/// Build the route table with content routes sharing `handles`.
pub fn build_table_with_handles(
    browser: SharedBrowser,
    handles: SharedHandleCache,
) -> Result<RouteTable, RouteTableError> {
    let mut builder = RouteTableBuilder::with_handles(handles);
    declare_routes(&mut builder, &browser);
    builder.build()
}

fn declare_tab_routes(builder: &mut RouteTableBuilder, browser: &SharedBrowser) {
    let b = Arc::clone(browser);
    builder.route(
        "/tabs/create",
        RouteSpec::new()
            .write(move |req| {
                let browser = Arc::clone(&b);
                async move {
                    let url = req.buf_text().trim().to_string();
                    let tab = browser.create_tab(&url).await?;
                    tracing::info!(id = tab.id, %url, "created tab");
                    Ok(req.buf.len())
                }
            })
            .truncate(|_| async { Ok(()) })
            .description("Create a new tab.")
            .usage("echo \"https://www.google.com\" > $0"),
    );

    let b = Arc::clone(browser);
    builder.route(
        "/tabs/by-title",
        RouteSpec::new()
            // Writable so tabs can be closed with rm.
            .getattr(|_| async { Ok(Attr::directory(mode::ALL)) })
            .readdir(move |_| {
                let browser = Arc::clone(&b);
                async move {
                    let tabs = browser.tabs().await?;
                    Ok(listing(tabs.iter().map(link_name)))
                }
            })
            .description("Open tabs, organized by title; each entry links to one tab.")
            .usage("ls $0"),
    );
    builder.route(
        "/tabs/by-title/:TAB_TITLE.#TAB_ID",
        tab_link(browser, "../by-id/")
            .description("One open tab; a symbolic link to /tabs/by-id/#TAB_ID."),
    );

    let b = Arc::clone(browser);
    builder.route(
        "/tabs/by-window",
        RouteSpec::new()
            .getattr(|_| async { Ok(Attr::directory(mode::ALL)) })
            .readdir(move |_| {
                let browser = Arc::clone(&b);
                async move {
                    let tabs = browser.tabs().await?;
                    Ok(listing(tabs.iter().map(window_link_name)))
                }
            })
            .description("Open tabs, organized by window then title; each entry links to one tab.")
            .usage("ls $0"),
    );
    builder.route(
        "/tabs/by-window/#TAB_WINDOW_ID.:TAB_TITLE.#TAB_ID",
        tab_link(browser, "../by-id/")
            .description("One open tab; a symbolic link to /tabs/by-id/#TAB_ID."),
    );

    let b = Arc::clone(browser);
    builder.route(
        "/tabs/last-focused",
        RouteSpec::new()
            .readlink(move |_| {
                let browser = Arc::clone(&b);
                async move {
                    let tab = browser.last_focused_tab().await?;
                    Ok(format!("by-id/{}", tab.id))
                }
            })
            .description("A symbolic link to the most recently focused tab."),
    );

    let b = Arc::clone(browser);
    builder.route(
        "/tabs/by-id",
        RouteSpec::new()
            .readdir(move |_| {
                let browser = Arc::clone(&b);
                async move {
                    let tabs = browser.tabs().await?;
                    Ok(listing(tabs.iter().map(|t| t.id.to_string())))
                }
            })
            .description("Open tabs, organized by ID; each subfolder represents an open tab.")
            .usage("ls $0"),
    );
}

fn declare_tab_files(builder: &mut RouteTableBuilder, handles: &SharedHandleCache, browser: &SharedBrowser) {
    builder.route(
        "/tabs/by-id/#TAB_ID/url.txt",
        RouteSpec::from(tab_setting(
            handles,
            browser,
            |tab| format!("{}\n", tab.url),
            |text| TabUpdate {
                url: Some(text.trim().to_string()),
                ..Default::default()
            },
        ))
        .description("The current URL of this tab.")
        .usage("cat $0")
        .usage("echo \"https://www.google.com\" > $0"),
    );
    builder.route(
        "/tabs/by-id/#TAB_ID/title.txt",
        RouteSpec::from(tab_file(handles, browser, |tab| format!("{}\n", tab.title)))
            .description("The current title of this tab.")
            .usage("cat $0"),
    );

    let b = Arc::clone(browser);
    builder.route(
        "/tabs/by-id/#TAB_ID/text.txt",
        RouteSpec::from(content_route(handles, move |req: OpRequest| {
            let browser = Arc::clone(&b);
            async move { Ok(browser.page_text(tab_id(&req)?).await?) }
        }))
        .description("The current body text of this tab.")
        .usage("cat $0"),
    );

    let b = Arc::clone(browser);
    builder.route(
        "/tabs/by-id/#TAB_ID/body.html",
        RouteSpec::from(content_route(handles, move |req: OpRequest| {
            let browser = Arc::clone(&b);
            async move { Ok(browser.page_html(tab_id(&req)?).await?) }
        }))
        .description("The current body HTML of this tab.")
        .usage("cat $0"),
    );

    builder.route(
        "/tabs/by-id/#TAB_ID/active",
        RouteSpec::from(tab_setting(
            handles,
            browser,
            |tab| flag(tab.active),
            |text| TabUpdate {
                active: Some(parse_flag(text)),
                ..Default::default()
            },
        ))
        .description("`true` or `false` depending on whether this tab is active in its window.")
        .usage("cat $0")
        .usage("echo true > $0"),
    );

    let b = Arc::clone(browser);
    builder.route(
        "/tabs/by-id/#TAB_ID/window",
        RouteSpec::new()
            .readlink(move |req| {
                let browser = Arc::clone(&b);
                async move {
                    let tab = browser.tab(tab_id(&req)?).await?;
                    Ok(format!("../../../windows/{}", tab.window_id))
                }
            })
            .description("A symbolic link to the window this tab lives in."),
    );

    let b = Arc::clone(browser);
    let mut control = RouteSpec::new()
        .write(move |req| {
            let browser = Arc::clone(&b);
            async move {
                let text = req.buf_text().trim().to_string();
                let command: TabCommand = text
                    .parse()
                    .map_err(|_| FsError::io(format!("unknown tab command {text:?}")))?;
                browser.run_command(tab_id(&req)?, command).await?;
                Ok(req.buf.len())
            }
        })
        .truncate(|_| async { Ok(()) })
        .description("Write a command to this file to control the tab.");
    for command in TabCommand::iter() {
        control = control.usage(format!("echo {command} > $0"));
    }
    builder.route("/tabs/by-id/#TAB_ID/control", control);

    let evals = WritableDirectory::new();
    let results = evals.clone();
    let b = Arc::clone(browser);
    let evals = evals.on_write(move |req, code| {
        let browser = Arc::clone(&b);
        let results = results.clone();
        async move {
            if req.path.ends_with(RESULT_SUFFIX) {
                return Ok(());
            }
            let all_frames = req.path.ends_with(".all-frames.js");
            let value = browser.execute_script(tab_id(&req)?, &code, all_frames).await?;
            results.insert(format!("{}{RESULT_SUFFIX}", req.path), format!("{value}\n"));
            Ok(())
        }
    });
    builder.route(
        "/tabs/by-id/#TAB_ID/evals",
        evals
            .dir_route()
            .description("Add JavaScript files to this folder to evaluate them in the tab.")
            .usage("ls $0"),
    );
    builder.route(
        "/tabs/by-id/#TAB_ID/evals/:FILENAME",
        evals
            .file_route(handles)
            .usage("echo \"2 + 2\" > tabs/by-id/#TAB_ID/evals/twoplustwo.js")
            .usage("cat tabs/by-id/#TAB_ID/evals/twoplustwo.js.result"),
    );
}

fn declare_tab_scripting(
    builder: &mut RouteTableBuilder,
    handles: &SharedHandleCache,
    browser: &SharedBrowser,
) {
    let watches = Watches::default();
    let w = watches.clone();
    builder.route(
        "/tabs/by-id/#TAB_ID/watches",
        RouteSpec::new()
            // Writable so watches can be created and removed.
            .getattr(|_| async { Ok(Attr::directory(mode::ALL)) })
            .readdir(move |req| {
                let names = tab_id(&req).map(|tab| w.list(tab));
                async move { Ok(listing(names?)) }
            })
            .description(
                "Put a file in this folder with a JS expression as its name; \
                 read it to evaluate the expression in the tab.",
            )
            .usage("ls $0"),
    );

    let (w, b) = (watches.clone(), Arc::clone(browser));
    let watch = content_route(handles, move |req: OpRequest| {
        let (watches, browser) = (w.clone(), Arc::clone(&b));
        async move {
            let (tab, expr) = watch_key(&req)?;
            if !watches.contains(tab, expr) {
                return Err(FsError::not_found(req.path.clone()));
            }
            let value = browser.execute_script(tab, expr, false).await?;
            Ok(format!("{value}\n"))
        }
    })
    // Writable only so `rm` does not ask for confirmation.
    .writable(|req, _| async move {
        Err::<(), _>(FsError::not_permitted(format!("{} is evaluated, not written", req.path)))
    });

    let (add, remove) = (watches.clone(), watches);
    builder.route(
        "/tabs/by-id/#TAB_ID/watches/:EXPR",
        RouteSpec::from(watch)
            .mknod(move |req| {
                let added = watch_key(&req).map(|(tab, expr)| add.add(tab, expr));
                async move { added }
            })
            .unlink(move |req| {
                let removed = watch_key(&req).and_then(|(tab, expr)| {
                    if remove.remove(tab, expr) {
                        Ok(())
                    } else {
                        Err(FsError::not_found(req.path.clone()))
                    }
                });
                async move { removed }
            })
            .description("A JS expression, named by the file, evaluated each time the file is read.")
            .usage("touch '/tabs/by-id/#TAB_ID/watches/2+2' && cat '/tabs/by-id/#TAB_ID/watches/2+2'"),
    );

    let b = Arc::clone(browser);
    builder.route(
        "/tabs/by-id/#TAB_ID/inputs",
        RouteSpec::new()
            .readdir(move |req| {
                let browser = Arc::clone(&b);
                async move {
                    let ids = browser.input_ids(tab_id(&req)?).await?;
                    Ok(listing(ids.iter().map(|id| format!("{id}.txt"))))
                }
            })
            .description("A file for each text input and textarea on the page that has an ID.")
            .usage("ls $0"),
    );

    let (getter, setter) = (Arc::clone(browser), Arc::clone(browser));
    let input = content_route(handles, move |req: OpRequest| {
        let browser = Arc::clone(&getter);
        async move {
            let input_id = req.vars.str("inputId")?;
            browser
                .input_value(tab_id(&req)?, input_id)
                .await?
                .ok_or_else(|| FsError::not_found(req.path.clone()))
        }
    })
    .writable(move |req, text| {
        let browser = Arc::clone(&setter);
        async move {
            let input_id = req.vars.str("inputId")?;
            browser.set_input_value(tab_id(&req)?, input_id, &text).await?;
            Ok(())
        }
    });
    builder.route(
        "/tabs/by-id/#TAB_ID/inputs/:INPUT_ID.txt",
        RouteSpec::from(input)
            .description("The current value of one text input.")
            .usage("cat $0")
            .usage("echo hello > $0"),
    );
}

fn declare_runtime_routes(builder: &mut RouteTableBuilder, browser: &SharedBrowser) {
    let b = Arc::clone(browser);
    builder.route(
        "/runtime/reload",
        RouteSpec::new()
            .write(move |req| {
                let browser = Arc::clone(&b);
                async move {
                    browser.reload_runtime().await?;
                    tracing::info!("runtime reload requested");
                    Ok(req.buf.len())
                }
            })
            .truncate(|_| async { Ok(()) })
            .description("Write anything to this file to reload the browser side of the filesystem.")
            .usage("echo reload > $0"),
    );
    builder.route_docs("/runtime/routes.html");
}

fn declare_window_routes(builder: &mut RouteTableBuilder, handles: &SharedHandleCache, browser: &SharedBrowser) {
    let b = Arc::clone(browser);
    builder.route(
        "/windows",
        RouteSpec::new()
            .readdir(move |_| {
                let browser = Arc::clone(&b);
                async move {
                    let windows = browser.windows().await?;
                    Ok(listing(windows.iter().map(|w| w.id.to_string())))
                }
            })
            .description("Open windows, organized by ID.")
            .usage("ls $0"),
    );

    let b = Arc::clone(browser);
    builder.route(
        "/windows/last-focused",
        RouteSpec::new()
            .readlink(move |_| {
                let browser = Arc::clone(&b);
                async move { Ok(browser.last_focused_window().await?.id.to_string()) }
            })
            .description("A symbolic link to the most recently focused window."),
    );

    let b = Arc::clone(browser);
    builder.route(
        "/windows/#WINDOW_ID/tabs",
        RouteSpec::new()
            .readdir(move |req| {
                let browser = Arc::clone(&b);
                async move {
                    let window_id = window_id(&req)?;
                    let tabs = browser.tabs().await?;
                    Ok(listing(
                        tabs.iter().filter(|t| t.window_id == window_id).map(link_name),
                    ))
                }
            })
            .description("Tabs in this window, organized by title.")
            .usage("ls $0"),
    );
    builder.route(
        "/windows/#WINDOW_ID/tabs/:TAB_TITLE.#TAB_ID",
        tab_link(browser, "../../../tabs/by-id/")
            .description("One tab in this window; a symbolic link to /tabs/by-id/#TAB_ID."),
    );

    builder.route(
        "/windows/#WINDOW_ID/focused",
        RouteSpec::from(window_setting(handles, browser, |w| flag(w.focused), parse_flag))
            .description("`true` or `false` depending on whether this window is focused.")
            .usage("cat $0")
            .usage("echo true > $0"),
    );

    let b = Arc::clone(browser);
    builder.route(
        "/windows/#WINDOW_ID/visible-tab.png",
        RouteSpec::from(content_route(handles, move |req: OpRequest| {
            let browser = Arc::clone(&b);
            async move { Ok(browser.capture_visible_tab(window_id(&req)?).await?) }
        }))
        .getattr(|_| async { Ok(Attr::file(SCREENSHOT_REPORTED_SIZE, mode::READ_ONLY)) })
        .description("A PNG screenshot of the tab visible in this window.")
        .usage("cp $0 screenshot.png"),
    );
}
