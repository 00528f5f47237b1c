use std::io;
use std::sync::Arc;
use std::time::Duration;

use adsight_rag::{
    public_message, IndexReport, QueryAnswer, QueryRequest, Rag, Turn, MAX_HISTORY_TURNS,
};
use crossterm::event::{Event, EventStream, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use futures::StreamExt;
use ratatui::{Frame, Terminal};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Margin, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap};
use tokio::sync::mpsc;

pub async fn run(rag: Arc<Rag>, identity: String) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(rag, identity);
    let res = run_app(&mut terminal, &mut app).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

struct App {
    input: String,
    /// Cursor position in chars, not bytes.
    cursor: usize,
    rag: Arc<Rag>,
    identity: String,
    history: Vec<Turn>,
    last_feedback_id: Option<u64>,
    rag_context: Option<String>,
    rag_answer: Option<String>,
    status: Option<String>,
    output_focus: OutputFocus,
    context_pane: Pane,
    answer_pane: Pane,
    is_loading: bool,
    spinner_idx: usize,
}

/// Scroll state of one output pane, measured on every draw.
#[derive(Debug, Default)]
struct Pane {
    scroll: usize,
    content_len: usize,
    view_height: usize,
    /// Jump to the top (or bottom, if pinned) on the next draw.
    reset: bool,
}

impl Pane {
    fn max_scroll(&self) -> usize {
        self.content_len.saturating_sub(self.view_height)
    }

    fn scroll_up(&mut self, by: usize) {
        self.scroll = self.scroll.saturating_sub(by);
    }

    fn scroll_down(&mut self, by: usize) {
        self.scroll = (self.scroll + by).min(self.max_scroll());
    }

    fn fit(&mut self, text: &str, area: Rect, pin_end: bool) {
        self.content_len = line_count(text);
        self.view_height = inner_height(area);
        let max = self.max_scroll();
        if self.reset {
            self.scroll = if pin_end { max } else { 0 };
            self.reset = false;
        } else {
            self.scroll = self.scroll.min(max);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFocus {
    Context,
    Answer,
}

enum Response {
    Answer {
        question: String,
        result: Result<QueryAnswer, String>,
    },
    Index(Result<IndexReport, String>),
    Rated(Result<(u64, i64), String>),
}

/// F3 rates the last answer up, F4 down, F5 neutral.
fn rating_for_key(code: KeyCode) -> Option<i64> {
    match code {
        KeyCode::F(3) => Some(1),
        KeyCode::F(4) => Some(-1),
        KeyCode::F(5) => Some(0),
        _ => None,
    }
}

impl App {
    fn new(rag: Arc<Rag>, identity: String) -> Self {
        Self {
            input: String::new(),
            cursor: 0,
            rag,
            identity,
            history: Vec::new(),
            last_feedback_id: None,
            rag_context: None,
            rag_answer: None,
            status: None,
            output_focus: OutputFocus::Answer,
            context_pane: Pane::default(),
            answer_pane: Pane::default(),
            is_loading: false,
            spinner_idx: 0,
        }
    }

    fn byte_index(&self, char_idx: usize) -> usize {
        self.input
            .char_indices()
            .nth(char_idx)
            .map(|(i, _)| i)
            .unwrap_or(self.input.len())
    }

    fn insert_char(&mut self, c: char) {
        let at = self.byte_index(self.cursor);
        self.input.insert(at, c);
        self.cursor += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        let at = self.byte_index(self.cursor);
        self.input.remove(at);
    }

    fn move_left(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
        }
    }

    fn move_right(&mut self) {
        if self.cursor < self.input.chars().count() {
            self.cursor += 1;
        }
    }

    fn submit(&mut self, tx: mpsc::UnboundedSender<Response>) {
        if self.input.trim().is_empty() || self.is_loading {
            return;
        }

        let question = self.input.trim().to_string();
        let request = QueryRequest {
            query: question.clone(),
            history: self.history.clone(),
            top_k: None,
        };
        self.is_loading = true;
        self.reset_panes();
        self.rag_context = None;
        self.rag_answer = None;
        self.status = None;

        let rag = Arc::clone(&self.rag);
        let identity = self.identity.clone();
        tokio::task::spawn_blocking(move || {
            let result = rag
                .answer_query(&identity, &request)
                .map_err(|err| public_message(&err));
            let _ = tx.send(Response::Answer { question, result });
        });

        self.input.clear();
        self.cursor = 0;
    }

    fn index_now(&mut self, tx: mpsc::UnboundedSender<Response>) {
        if self.is_loading {
            return;
        }
        self.is_loading = true;
        self.reset_panes();
        self.rag_context = Some("Indexing...".to_string());
        self.rag_answer = Some("Building embeddings and publishing a new snapshot.".to_string());
        self.status = None;
        let rag = Arc::clone(&self.rag);
        tokio::task::spawn_blocking(move || {
            let result = rag.index_corpus().map_err(|err| err.to_string());
            let _ = tx.send(Response::Index(result));
        });
    }

    fn rate_last(&mut self, rating: i64, tx: mpsc::UnboundedSender<Response>) {
        let Some(id) = self.last_feedback_id else {
            self.status = Some("Nothing to rate yet.".to_string());
            return;
        };
        let rag = Arc::clone(&self.rag);
        tokio::task::spawn_blocking(move || {
            let result = rag
                .rate_answer(id, rating)
                .map(|()| (id, rating))
                .map_err(|err| public_message(&err));
            let _ = tx.send(Response::Rated(result));
        });
    }

    fn apply(&mut self, response: Response) {
        match response {
            Response::Answer { question, result } => {
                self.is_loading = false;
                match result {
                    Ok(answer) => {
                        self.rag_context = Some(format_context(&answer.context));
                        self.rag_answer = Some(answer.answer.clone());
                        self.last_feedback_id = Some(answer.feedback_id);
                        self.history.push(Turn::user(question));
                        self.history.push(Turn::assistant(answer.answer));
                        let excess = self.history.len().saturating_sub(MAX_HISTORY_TURNS);
                        self.history.drain(..excess);
                        self.status = Some("Rate this answer: F3 up, F4 down, F5 neutral.".to_string());
                    }
                    Err(err) => {
                        self.rag_context = Some(String::new());
                        self.rag_answer = Some(format!("Error: {}", err));
                    }
                }
            }
            Response::Index(result) => {
                self.is_loading = false;
                match result {
                    Ok(IndexReport::Indexed { chunks, skipped, .. }) => {
                        self.rag_context = Some("Indexing complete.".to_string());
                        self.rag_answer = Some(format!(
                            "Indexed {} chunks ({} rows skipped). You can now ask questions.",
                            chunks, skipped
                        ));
                    }
                    Ok(IndexReport::Empty { message, .. }) => {
                        self.rag_context = Some("Indexing skipped.".to_string());
                        self.rag_answer = Some(message);
                    }
                    Err(err) => {
                        self.rag_context = Some("Indexing failed.".to_string());
                        self.rag_answer = Some(format!("Error: {}", err));
                    }
                }
            }
            Response::Rated(result) => {
                self.status = Some(match result {
                    Ok((id, rating)) => format!("Saved rating {} for answer #{}.", rating, id),
                    Err(err) => format!("Rating failed: {}", err),
                });
            }
        }
        self.reset_panes();
    }

    fn reset_panes(&mut self) {
        self.context_pane.reset = true;
        self.answer_pane.reset = true;
    }

    fn focused_pane(&mut self) -> &mut Pane {
        match self.output_focus {
            OutputFocus::Context => &mut self.context_pane,
            OutputFocus::Answer => &mut self.answer_pane,
        }
    }

    fn scroll_up(&mut self, by: usize) {
        self.focused_pane().scroll_up(by);
    }

    fn scroll_down(&mut self, by: usize) {
        self.focused_pane().scroll_down(by);
    }

    fn scroll_to_start(&mut self) {
        self.focused_pane().scroll = 0;
    }

    fn scroll_to_end(&mut self) {
        let pane = self.focused_pane();
        pane.scroll = pane.max_scroll();
    }

    fn focused_view_height(&self) -> usize {
        match self.output_focus {
            OutputFocus::Context => self.context_pane.view_height,
            OutputFocus::Answer => self.answer_pane.view_height,
        }
    }
}

fn format_context(chunks: &[String]) -> String {
    if chunks.is_empty() {
        return "(no matching records)".to_string();
    }
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn inner_width(area: Rect) -> usize {
    area.width.saturating_sub(2) as usize
}

fn inner_height(area: Rect) -> usize {
    area.height.saturating_sub(2) as usize
}

/// First visible char when the input is wider than the box.
fn view_start(len: usize, cursor: usize, max_width: usize) -> usize {
    if len <= max_width {
        return 0;
    }
    let cursor = cursor.min(len);
    let start = cursor.saturating_sub(max_width / 2);
    start.min(len - max_width)
}

fn truncate_input(input: &str, cursor: usize, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    let len = input.chars().count();
    let start = view_start(len, cursor, max_width);
    input.chars().skip(start).take(max_width).collect()
}

fn cursor_x_in_view(input: &str, cursor: usize, max_width: usize) -> usize {
    if max_width == 0 {
        return 0;
    }
    let len = input.chars().count();
    let cursor = cursor.min(len);
    cursor
        .saturating_sub(view_start(len, cursor, max_width))
        .min(max_width)
}

fn line_count(text: &str) -> usize {
    let count = text.lines().count();
    if count == 0 { 1 } else { count }
}

fn render_pane(frame: &mut Frame, area: Rect, pane: &Pane, text: String, block: Block, style: Style) {
    let paragraph = Paragraph::new(text)
        .style(style)
        .scroll((pane.scroll as u16, 0))
        .wrap(Wrap { trim: true })
        .block(block);
    frame.render_widget(paragraph, area);

    let mut scrollbar = ScrollbarState::new(pane.content_len).position(pane.scroll);
    let scrollbar_widget = Scrollbar::new(ScrollbarOrientation::VerticalRight)
        .track_style(Style::default().fg(Color::DarkGray))
        .thumb_style(Style::default().fg(Color::Blue));
    frame.render_stateful_widget(
        scrollbar_widget,
        area.inner(Margin {
            vertical: 1,
            horizontal: 0,
        }),
        &mut scrollbar,
    );
}

fn draw_ui(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> io::Result<()> {
    let spinner = ["|", "/", "-", "\\"];

    terminal.draw(|frame| {
        let title_style = Style::default().fg(Color::Black).add_modifier(Modifier::BOLD);
        let info_border = Style::default().fg(Color::Black);
        let input_border = Style::default().fg(Color::DarkGray);
        let help_border = Style::default().fg(Color::DarkGray);
        let info_text_style = Style::default().fg(Color::Blue);
        let help_text_style = Style::default().fg(Color::DarkGray);
        let input_text_style = Style::default().fg(Color::DarkGray);

        let area = frame.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(8),
                Constraint::Length(3),
                Constraint::Length(3),
            ])
            .split(area);
        let output_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
            .split(chunks[0]);

        let context_text = app
            .rag_context
            .as_deref()
            .unwrap_or("Retrieved records will appear here after you ask a question.")
            .to_string();
        let answer_text = if app.is_loading {
            "Loading...".to_string()
        } else {
            app.rag_answer
                .as_deref()
                .unwrap_or("Ask about your campaigns below and press Enter.")
                .to_string()
        };

        let context_title = match app.output_focus {
            OutputFocus::Context => "Context *",
            OutputFocus::Answer => "Context",
        };
        let focus_mark = match app.output_focus {
            OutputFocus::Answer => " *",
            OutputFocus::Context => "",
        };
        let answer_title = if app.is_loading {
            format!("Answer {}{}", spinner[app.spinner_idx], focus_mark)
        } else {
            format!("Answer{}", focus_mark)
        };

        let context_block = Block::bordered()
            .title(context_title)
            .title_style(title_style)
            .border_style(info_border);
        let answer_block = Block::bordered()
            .title(answer_title)
            .title_style(title_style)
            .border_style(info_border);

        app.context_pane.fit(&context_text, output_chunks[0], false);
        app.answer_pane.fit(&answer_text, output_chunks[1], true);
        render_pane(frame, output_chunks[0], &app.context_pane, context_text, context_block, info_text_style);
        render_pane(frame, output_chunks[1], &app.answer_pane, answer_text, answer_block, info_text_style);

        let input_title = format!(
            "Question ({}, {})  [Ctrl+R: Index]",
            app.rag.config().client,
            app.identity
        );
        let input_block = Block::bordered()
            .title(input_title)
            .title_style(title_style)
            .border_style(input_border);
        let input_view = truncate_input(&app.input, app.cursor, inner_width(chunks[1]));
        let input = Paragraph::new(input_view)
            .style(input_text_style)
            .block(input_block)
            .wrap(Wrap { trim: false });
        frame.render_widget(input, chunks[1]);

        let cursor_x = cursor_x_in_view(&app.input, app.cursor, inner_width(chunks[1]));
        let x = chunks[1].x + 1 + cursor_x as u16;
        let y = chunks[1].y + 1;
        frame.set_cursor_position((x, y));

        let help_title = app.status.as_deref().unwrap_or("Controls");
        let help_block = Block::bordered()
            .title(help_title)
            .title_style(title_style)
            .border_style(help_border);
        let help_text = "Enter: Ask | F2/Ctrl+R: Index | F3/F4/F5: Rate up/down/neutral | Ctrl+O: Focus | Up/Down/PgUp/PgDn/Home/End: Scroll | Esc/Ctrl+C: Quit";
        let help = Paragraph::new(help_text)
            .style(help_text_style)
            .wrap(Wrap { trim: true })
            .block(help_block);
        frame.render_widget(help, chunks[2]);
    })?;

    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> io::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();
    let mut events = EventStream::new();
    let mut spinner_tick = tokio::time::interval(Duration::from_millis(100));
    spinner_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    draw_ui(terminal, app)?;

    loop {
        tokio::select! {
            _ = spinner_tick.tick() => {
                if app.is_loading {
                    app.spinner_idx = (app.spinner_idx + 1) % 4;
                    draw_ui(terminal, app)?;
                }
            }
            maybe_result = rx.recv() => {
                if let Some(result) = maybe_result {
                    app.apply(result);
                    draw_ui(terminal, app)?;
                }
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        match key.code {
                            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
                            KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => app.index_now(tx.clone()),
                            KeyCode::F(2) => app.index_now(tx.clone()),
                            code @ (KeyCode::F(3) | KeyCode::F(4) | KeyCode::F(5)) => {
                                if let Some(rating) = rating_for_key(code) {
                                    app.rate_last(rating, tx.clone());
                                }
                            }
                            KeyCode::Esc => return Ok(()),
                            KeyCode::Enter => app.submit(tx.clone()),
                            KeyCode::Up => app.scroll_up(1),
                            KeyCode::Down => app.scroll_down(1),
                            KeyCode::PageUp => app.scroll_up(app.focused_view_height().max(1)),
                            KeyCode::PageDown => app.scroll_down(app.focused_view_height().max(1)),
                            KeyCode::Home => app.scroll_to_start(),
                            KeyCode::End => app.scroll_to_end(),
                            KeyCode::Char('o') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                                app.output_focus = match app.output_focus {
                                    OutputFocus::Context => OutputFocus::Answer,
                                    OutputFocus::Answer => OutputFocus::Context,
                                };
                            }
                            KeyCode::Left => app.move_left(),
                            KeyCode::Right => app.move_right(),
                            KeyCode::Backspace => app.delete_char(),
                            KeyCode::Char(ch) => app.insert_char(ch),
                            _ => {}
                        }
                        draw_ui(terminal, app)?;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => {}
                    None => return Ok(()),
                }
            }
        }
    }
}
