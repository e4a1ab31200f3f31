use std::path::PathBuf;
use std::sync::Arc;

use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::task::JoinHandle;

use studysphere_core::{
    Attachments, CameraDevice, CaptureSession, ChatError, Controller, ConversationId, FacingMode,
    Message, Reply, ResponseClient, Role, SubmitRejected, UploadCandidate,
};

/// Prompts offered on the welcome screen
pub const SUGGESTIONS: [&str; 6] = [
    "Solve a math problem",
    "Explain a physics concept",
    "Translate a sentence",
    "Help with chemistry",
    "Summarize a topic",
    "Correct my grammar",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    History,
    Input,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlay {
    None,
    AttachPrompt,
    Camera,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub focus: FocusPane,
    pub overlay: Overlay,
    pub controller: Controller,
    pub client: ResponseClient,
    pub model_name: String,

    // Input state
    pub input_cursor: usize,
    pub attachments: Attachments,
    pub attach_input: String,
    pub attach_cursor: usize,

    // Background work
    pub reply_task: Option<(ConversationId, JoinHandle<Reply>)>,
    pub camera: Arc<dyn CameraDevice>,
    pub capture_session: Option<CaptureSession>,
    pub capture_task: Option<JoinHandle<Result<UploadCandidate, ChatError>>>,
    pub camera_error: Option<String>,

    // History list: row 0 is "New Chat", conversations follow
    pub history_state: ListState,

    // Chat view
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub animation_frame: u8, // 0-2 for ellipsis animation

    /// One-line notice, cleared by the next key press
    pub notice: Option<String>,

    // Panel areas for mouse hit-testing (updated during render)
    pub history_area: Option<Rect>,
    pub chat_area: Option<Rect>,
}

impl App {
    pub fn new(
        controller: Controller,
        client: ResponseClient,
        camera: Arc<dyn CameraDevice>,
        model_name: String,
    ) -> Self {
        let mut history_state = ListState::default();
        history_state.select(Some(0));

        Self {
            should_quit: false,
            focus: FocusPane::Input,
            overlay: Overlay::None,
            controller,
            client,
            model_name,

            input_cursor: 0,
            attachments: Attachments::new(),
            attach_input: String::new(),
            attach_cursor: 0,

            reply_task: None,
            camera,
            capture_session: None,
            capture_task: None,
            camera_error: None,

            history_state,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            animation_frame: 0,

            notice: None,

            history_area: None,
            chat_area: None,
        }
    }

    /// True while the displayed conversation is the one awaiting a reply
    pub fn is_thinking_here(&self) -> bool {
        match (&self.reply_task, self.controller.active_id()) {
            (Some((target, _)), Some(active)) => target == active,
            _ => false,
        }
    }

    /// Send the draft and attachments; the reply is awaited in the background
    pub fn send_draft(&mut self) {
        match self.controller.submit_draft(&mut self.attachments) {
            Ok(pending) => {
                self.input_cursor = 0;
                self.sync_history_selection();

                let client = self.client.clone();
                let target = pending.conversation_id.clone();
                let handle = tokio::spawn(async move { pending.run(&client).await });
                self.reply_task = Some((target, handle));

                // Scroll to bottom so "Thinking..." is visible
                self.scroll_chat_to_bottom();
            }
            Err(SubmitRejected::Empty) => {}
            Err(rejected) => {
                tracing::debug!(reason = %rejected, "Send rejected");
                self.notice = Some(format!("Can't send yet: {}", rejected));
            }
        }
    }

    /// Collect finished background work. Called on every tick.
    pub async fn poll_background(&mut self) {
        if self.reply_task.as_ref().is_some_and(|(_, h)| h.is_finished()) {
            if let Some((target, handle)) = self.reply_task.take() {
                let reply = match handle.await {
                    Ok(reply) => reply,
                    Err(e) => {
                        tracing::error!(error = %e, "Reply task failed");
                        Reply::failed(target, e.to_string())
                    }
                };
                self.controller.complete(reply);
                self.scroll_chat_to_bottom();
            }
        }

        for failure in self.attachments.poll() {
            self.notice = Some(failure.to_string());
        }

        if self.capture_task.as_ref().is_some_and(|h| h.is_finished()) {
            if let Some(handle) = self.capture_task.take() {
                match handle.await {
                    Ok(Ok(candidate)) => {
                        self.attachments.push_ready(candidate);
                        self.overlay = Overlay::None;
                    }
                    Ok(Err(e)) => self.camera_error = Some(e.to_string()),
                    Err(e) => self.camera_error = Some(format!("Capture failed: {}", e)),
                }
            }
        }
    }

    // Attachments

    pub fn open_attach_prompt(&mut self) {
        self.attach_input.clear();
        self.attach_cursor = 0;
        self.overlay = Overlay::AttachPrompt;
    }

    /// Start encoding every path typed into the attach prompt. Paths are
    /// split shell-style, so quoted or escaped spaces survive.
    pub fn attach_from_prompt(&mut self) {
        let paths = parse_paths(&self.attach_input);
        self.attach_input.clear();
        self.attach_cursor = 0;
        self.overlay = Overlay::None;

        for path in paths {
            if path.is_file() {
                self.attachments.begin_encode(path);
            } else {
                self.notice = Some(format!("Not a file: {}", path.display()));
            }
        }
    }

    pub fn remove_last_attachment(&mut self) {
        self.attachments.release_last();
    }

    // Camera

    pub fn open_camera(&mut self) {
        self.overlay = Overlay::Camera;
        self.camera_error = None;
        match CaptureSession::open(self.camera.as_ref(), FacingMode::Environment) {
            Ok(session) => self.capture_session = Some(session),
            Err(e) => self.camera_error = Some(e.to_string()),
        }
    }

    pub fn capture_photo(&mut self) {
        if self.capture_task.is_some() {
            return;
        }
        if let Some(session) = self.capture_session.take() {
            self.capture_task = Some(tokio::spawn(session.capture()));
        }
    }

    /// Close the capture surface; the stream stops on every path
    pub fn close_camera(&mut self) {
        if let Some(handle) = self.capture_task.take() {
            handle.abort();
        }
        if let Some(session) = self.capture_session.take() {
            session.cancel();
        }
        self.camera_error = None;
        self.overlay = Overlay::None;
    }

    pub fn is_capturing(&self) -> bool {
        self.capture_task.is_some()
    }

    // History navigation

    pub fn history_len(&self) -> usize {
        self.controller.store().len() + 1
    }

    pub fn history_nav_down(&mut self) {
        let i = self.history_state.selected().unwrap_or(0);
        let last = self.history_len() - 1;
        self.history_state.select(Some((i + 1).min(last)));
    }

    pub fn history_nav_up(&mut self) {
        let i = self.history_state.selected().unwrap_or(0);
        self.history_state.select(Some(i.saturating_sub(1)));
    }

    fn selected_conversation_id(&self) -> Option<ConversationId> {
        let i = self.history_state.selected()?.checked_sub(1)?;
        self.controller.store().conversations().get(i).map(|c| c.id.clone())
    }

    pub fn select_history(&mut self) {
        match self.selected_conversation_id() {
            Some(id) => {
                self.controller.select_conversation(&id);
                self.scroll_chat_to_bottom();
            }
            None => self.controller.new_chat(),
        }
        self.focus = FocusPane::Input;
    }

    pub fn delete_selected(&mut self) {
        if let Some(id) = self.selected_conversation_id() {
            self.controller.delete_conversation(&id);
            let last = self.history_len() - 1;
            if self.history_state.selected().is_some_and(|i| i > last) {
                self.history_state.select(Some(last));
            }
        }
    }

    pub fn new_chat(&mut self) {
        self.controller.new_chat();
        self.history_state.select(Some(0));
        self.chat_scroll = 0;
        self.focus = FocusPane::Input;
    }

    /// Keep the highlighted history row on the active conversation
    pub fn sync_history_selection(&mut self) {
        let row = self.controller.active_id().and_then(|active| {
            self.controller
                .store()
                .conversations()
                .iter()
                .position(|c| &c.id == active)
        });
        self.history_state.select(Some(row.map_or(0, |i| i + 1)));
    }

    pub fn apply_suggestion(&mut self, index: usize) {
        if let Some(text) = SUGGESTIONS.get(index) {
            *self.controller.draft_mut() = text.to_string();
            self.input_cursor = text.chars().count();
            self.focus = FocusPane::Input;
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.controller.is_in_flight() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_chat_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
    }

    pub fn scroll_chat_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    /// Scroll chat to bottom so the newest message is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        if let Some(conversation) = self.controller.active_conversation() {
            for msg in &conversation.messages {
                total_lines = total_lines.saturating_add(message_height(msg, wrap_width));
            }
        }

        if self.is_thinking_here() {
            total_lines = total_lines.saturating_add(2); // "AI:" + "Thinking..."
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        self.chat_scroll = total_lines.saturating_sub(visible_height);
    }
}

/// Rendered height of one message: role line, wrapped text, image marker,
/// trailing blank.
pub fn message_height(msg: &Message, wrap_width: usize) -> u16 {
    let wrap_width = wrap_width.max(1);
    let mut lines: usize = 1;
    for line in msg.text.lines() {
        let char_count = line.chars().count();
        lines += if char_count == 0 { 1 } else { char_count.div_ceil(wrap_width) };
    }
    if msg.role == Role::User && msg.image_count() > 0 {
        lines += 1;
    }
    lines += 1;
    lines.min(u16::MAX as usize) as u16
}

/// Split attach-prompt input into paths. Quoted and backslash-escaped
/// spaces stay inside one path; unbalanced quotes fall back to plain
/// whitespace splitting.
pub(crate) fn parse_paths(input: &str) -> Vec<PathBuf> {
    if input.trim().is_empty() {
        return Vec::new();
    }
    let parts = match shell_words::split(input) {
        Ok(parts) => parts,
        Err(e) => {
            tracing::debug!(error = %e, "Unbalanced quotes in path input");
            input.split_whitespace().map(str::to_string).collect()
        }
    };

    parts
        .into_iter()
        .filter(|raw| !raw.is_empty())
        .map(|raw| match raw.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(&raw)),
            None => PathBuf::from(raw),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use studysphere_core::ai::GenerateRequest;
    use studysphere_core::camera::CameraStream;
    use studysphere_core::{MemoryBlobStore, ModelService};
    use tokio::sync::Notify;

    /// Answers only once the test opens the gate
    struct GatedService {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl ModelService for GatedService {
        async fn generate_content(&self, _request: &GenerateRequest) -> Result<String, ChatError> {
            self.gate.notified().await;
            Ok("**4**".to_string())
        }
    }

    struct CrashingService;

    #[async_trait]
    impl ModelService for CrashingService {
        async fn generate_content(&self, _request: &GenerateRequest) -> Result<String, ChatError> {
            panic!("model service crashed");
        }
    }

    struct NoCamera;

    impl CameraDevice for NoCamera {
        fn open(&self, _facing: FacingMode) -> Result<Box<dyn CameraStream>, ChatError> {
            Err(ChatError::DeviceUnavailable(
                "Could not access camera. Please check permissions.".to_string(),
            ))
        }
    }

    fn app_with(service: Arc<dyn ModelService>) -> App {
        let controller = Controller::new(Arc::new(MemoryBlobStore::new()));
        App::new(
            controller,
            ResponseClient::new(service),
            Arc::new(NoCamera),
            "gemini-test".to_string(),
        )
    }

    fn type_draft(app: &mut App, text: &str) {
        *app.controller.draft_mut() = text.to_string();
        app.input_cursor = text.chars().count();
    }

    async fn wait_for_reply(app: &mut App) {
        for _ in 0..400 {
            app.poll_background().await;
            if app.reply_task.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("reply never arrived");
    }

    #[tokio::test]
    async fn test_send_draft_then_poll_appends_reply() {
        let gate = Arc::new(Notify::new());
        let mut app = app_with(Arc::new(GatedService { gate: gate.clone() }));

        type_draft(&mut app, "2+2?");
        app.send_draft();

        assert!(app.controller.is_in_flight());
        assert!(app.is_thinking_here());
        assert_eq!(app.controller.draft(), "");
        assert_eq!(app.input_cursor, 0);
        assert_eq!(app.history_state.selected(), Some(1));

        // Not finished yet, so polling changes nothing
        app.poll_background().await;
        assert!(app.controller.is_in_flight());

        gate.notify_one();
        wait_for_reply(&mut app).await;

        assert!(!app.controller.is_in_flight());
        assert!(!app.is_thinking_here());
        let messages = &app.controller.active_conversation().unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Model);
        assert_eq!(messages[1].text, "**4**");
    }

    #[tokio::test]
    async fn test_thinking_follows_the_reply_target() {
        let gate = Arc::new(Notify::new());
        let mut app = app_with(Arc::new(GatedService { gate: gate.clone() }));

        type_draft(&mut app, "Explain osmosis");
        app.send_draft();
        let target = app.controller.active_id().cloned().unwrap();

        app.new_chat();
        assert!(app.controller.is_in_flight());
        assert!(!app.is_thinking_here());

        app.controller.select_conversation(&target);
        assert!(app.is_thinking_here());

        // Away again when the reply lands; it still goes to its origin
        app.new_chat();
        gate.notify_one();
        wait_for_reply(&mut app).await;

        assert!(app.controller.active_id().is_none());
        let origin = app.controller.store().get(&target).unwrap();
        assert_eq!(origin.messages.len(), 2);
        assert_eq!(origin.messages[1].text, "**4**");
    }

    #[tokio::test]
    async fn test_crashed_reply_task_takes_failed_path() {
        let mut app = app_with(Arc::new(CrashingService));

        type_draft(&mut app, "2+2?");
        app.send_draft();
        wait_for_reply(&mut app).await;

        assert!(!app.controller.is_in_flight());
        let messages = &app.controller.active_conversation().unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Model);
        assert!(messages[1]
            .text
            .starts_with("Sorry, I couldn't process that request."));
    }

    #[tokio::test]
    async fn test_second_send_while_waiting_keeps_draft() {
        let gate = Arc::new(Notify::new());
        let mut app = app_with(Arc::new(GatedService { gate: gate.clone() }));

        type_draft(&mut app, "first");
        app.send_draft();
        type_draft(&mut app, "second");
        app.send_draft();

        assert_eq!(app.controller.draft(), "second");
        assert_eq!(
            app.notice.as_deref(),
            Some("Can't send yet: a response is still being generated")
        );

        gate.notify_one();
        wait_for_reply(&mut app).await;
        assert_eq!(app.controller.active_conversation().unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_camera_shows_error_and_closes() {
        let mut app = app_with(Arc::new(CrashingService));

        app.open_camera();
        assert_eq!(app.overlay, Overlay::Camera);
        assert!(app.capture_session.is_none());
        assert!(app
            .camera_error
            .as_deref()
            .unwrap()
            .contains("Could not access camera"));

        // Space without a session neither captures nor panics
        app.capture_photo();
        assert!(!app.is_capturing());

        app.close_camera();
        assert_eq!(app.overlay, Overlay::None);
        assert!(app.camera_error.is_none());
    }

    #[test]
    fn test_parse_paths_keeps_quoted_spaces() {
        let paths = parse_paths("'/tmp/a b.png'  \"/tmp/c d.jpg\" /tmp/e\\ f.gif /tmp/g.webp");
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/tmp/a b.png"),
                PathBuf::from("/tmp/c d.jpg"),
                PathBuf::from("/tmp/e f.gif"),
                PathBuf::from("/tmp/g.webp"),
            ]
        );
    }

    #[test]
    fn test_parse_paths_single_screenshot_name() {
        let paths = parse_paths("'/Users/me/Desktop/Screenshot 2024-05-01 at 10.15.32.png'");
        assert_eq!(
            paths,
            vec![PathBuf::from("/Users/me/Desktop/Screenshot 2024-05-01 at 10.15.32.png")]
        );
    }

    #[test]
    fn test_parse_paths_unbalanced_quote_falls_back() {
        assert_eq!(
            parse_paths("'/tmp/a.png /tmp/b.png"),
            vec![PathBuf::from("'/tmp/a.png"), PathBuf::from("/tmp/b.png")]
        );
        assert!(parse_paths("   ").is_empty());
    }

    #[test]
    fn test_message_height_counts_wrapped_lines() {
        let msg = Message::model("a".repeat(25));
        // role + 3 wrapped lines + blank
        assert_eq!(message_height(&msg, 10), 5);

        let msg = Message::user("", vec!["data:image/png;base64,AA".to_string()]);
        // role + image marker + blank
        assert_eq!(message_height(&msg, 10), 3);
    }
}
