//! Deterministic recognizer for tests.

use anyhow::{anyhow, Result};
use image::DynamicImage;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::engine::{OcrLine, OcrWord, PixelRect, RecognizeOptions, Recognizer};

/// One scripted reply: tokens (each with an optional box), an error, or a
/// panic inside the recognizer.
pub enum Reply {
    Tokens(Vec<(String, Option<PixelRect>)>),
    Fail,
    Panic,
}

/// Replays scripted token lists in call order, then repeats `fallback`.
pub struct ScriptedRecognizer {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Vec<String>,
    calls: Mutex<Vec<RecognizeOptions>>,
    sizes: Mutex<Vec<(u32, u32)>>,
}

impl ScriptedRecognizer {
    pub fn new(script: &[&[&str]]) -> Self {
        let replies = script
            .iter()
            .map(|tokens| Reply::Tokens(tokens.iter().map(|t| (t.to_string(), None)).collect()))
            .collect();
        Self::from_replies(replies)
    }

    pub fn from_replies(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: Vec::new(),
            calls: Mutex::new(Vec::new()),
            sizes: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `tokens`.
    pub fn repeating(tokens: &[&str]) -> Self {
        let mut stub = Self::from_replies(Vec::new());
        stub.fallback = tokens.iter().map(|t| t.to_string()).collect();
        stub
    }

    pub fn calls(&self) -> Vec<RecognizeOptions> {
        self.calls.lock().unwrap().clone()
    }

    /// Dimensions of every image passed in, in call order.
    pub fn sizes(&self) -> Vec<(u32, u32)> {
        self.sizes.lock().unwrap().clone()
    }
}

impl Recognizer for ScriptedRecognizer {
    fn recognize(&self, img: &DynamicImage, options: &RecognizeOptions) -> Result<Vec<OcrLine>> {
        self.calls.lock().unwrap().push(options.clone());
        self.sizes.lock().unwrap().push((img.width(), img.height()));

        let reply = self.replies.lock().unwrap().pop_front();
        let tokens = match reply {
            Some(Reply::Tokens(tokens)) => tokens,
            Some(Reply::Fail) => return Err(anyhow!("scripted recognizer failure")),
            Some(Reply::Panic) => panic!("scripted recognizer panic"),
            None => self.fallback.iter().map(|t| (t.clone(), None)).collect(),
        };

        Ok(tokens
            .into_iter()
            .map(|(text, bbox)| OcrLine {
                text: text.clone(),
                words: vec![OcrWord {
                    text,
                    confidence: 90.0,
                    bbox,
                }],
                confidence: 90.0,
                bbox,
            })
            .collect())
    }
}
