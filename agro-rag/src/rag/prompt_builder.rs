//! Prompt construction for the farmer-facing assistant.
//!
//! The prompt is written in Indonesian: a role block, answering rules, the
//! conversation so far, the retrieved context and the latest question.

use crate::protocol::HistoryTurn;

/// Separator between retrieved chunk texts in the context block
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Fixed answer the model is told to give when the context has no answer
pub const NOT_FOUND_ANSWER: &str = "Maaf, informasi tersebut tidak ditemukan dalam dokumen saya.";

// ============ Sections ============

pub const ROLE_SECTION: &str = "\
## PERAN DAN TUJUAN
Anda adalah \"Penyuluh Pertanian Digital,\" seorang asisten AI ahli. Jawab pertanyaan petani \
berdasarkan konteks yang diberikan dengan bahasa yang jelas dan praktis.";

pub const RULES_HEADING: &str = "## ATURAN";
pub const HISTORY_HEADING: &str = "## RIWAYAT PERCAKAPAN";
pub const CONTEXT_HEADING: &str = "## KONTEKS DARI DOKUMEN PENELITIAN";
pub const QUESTION_HEADING: &str = "## PERTANYAAN TERBARU DARI PETANI";
pub const ANSWER_HEADING: &str = "## JAWABAN PRAKTIS";

const SECTION_BREAK: &str = "---";

// ============ Builders ============

/// Answering rules, ending with the fixed not-found answer
pub fn answer_rules() -> String {
    format!(
        "{}\n\
- Jawaban HARUS 100% berdasarkan pada \"KONTEKS\".\n\
- Jangan menyebutkan \"berdasarkan konteks\". Langsung saja berikan jawabannya.\n\
- Jika informasi tidak ada, katakan \"{}\"",
        RULES_HEADING, NOT_FOUND_ANSWER
    )
}

/// Render earlier turns as `Petani:` / `Asisten:` pairs, oldest first
pub fn format_history(history: &[HistoryTurn]) -> String {
    history
        .iter()
        .map(|turn| format!("Petani: {}\nAsisten: {}\n\n", turn.user, turn.bot))
        .collect()
}

/// Join chunk texts into the context block
pub fn join_context<S: AsRef<str>>(texts: &[S]) -> String {
    texts
        .iter()
        .map(|t| t.as_ref())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Full prompt for one question
pub fn build_answer_prompt(question: &str, context: &str, history: &[HistoryTurn]) -> String {
    let sections = [
        ROLE_SECTION.to_string(),
        format!("{}\n", answer_rules()),
        SECTION_BREAK.to_string(),
        format!("{}\n{}", HISTORY_HEADING, format_history(history)),
        SECTION_BREAK.to_string(),
        format!("{}\n{}", CONTEXT_HEADING, context),
        SECTION_BREAK.to_string(),
        format!("{}\n{}", QUESTION_HEADING, question.trim()),
        SECTION_BREAK.to_string(),
        format!("{}\n", ANSWER_HEADING),
    ];
    sections.join("\n")
}
