//! Decides which backend operation a chat input maps to.
//!
//! Matching is case-insensitive substring search. Word boundaries are not
//! used because most keywords are CJK, where `\b` never matches.

use std::str::FromStr;

use crate::core::protocol::{
    ANALYZE_IMAGE_PATH, AnalyzeImageRequest, CHAT_PATH, ChatRequest, EditFunction,
    GENERATE_IMAGE_PATH, GenerateImageRequest, IMAGE_EDIT_PATH, ImageEditRequest,
};

const ANALYSIS_KEYWORDS: &[&str] = &[
    "分析",
    "描述这张图",
    "describe this image",
    "解读这张图片",
    "这是什么",
    "what is this",
    "看看这张图",
    "它的提示词是什么",
    "what's its prompt",
    "咒语是什么",
    "反向提示词",
];

const STYLE_PREFIXES: &[&str] = &["风格化：", "style:", "全局风格：", "整体风格："];
const STYLE_KEYWORDS: &[&str] = &["风格", "style"];
const GENERATION_KEYWORDS: &[&str] = &["生成", "画", "创作"];
const GENERATION_EXCLUSIONS: &[&str] = &[
    "分析",
    "描述",
    "解读",
    "这是什么",
    "看看",
    "提示词",
    "咒语",
    "风格化：",
    "style:",
    "全局风格：",
    "整体风格：",
    "编辑",
    "修改",
];

/// Question sent when an image arrives with no text at all.
pub const DESCRIBE_IMAGE_QUESTION: &str = "请详细描述这张图片的内容和特点。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectRatio {
    Square,
    Landscape4x3,
    Portrait3x4,
    Wide16x9,
    Tall9x16,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Landscape4x3,
        AspectRatio::Portrait3x4,
        AspectRatio::Wide16x9,
        AspectRatio::Tall9x16,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Portrait3x4 => "3:4",
            AspectRatio::Wide16x9 => "16:9",
            AspectRatio::Tall9x16 => "9:16",
        }
    }

    /// Provider size string, `width*height`.
    pub fn size(self) -> &'static str {
        match self {
            AspectRatio::Square => "1024*1024",
            AspectRatio::Landscape4x3 => "1024*768",
            AspectRatio::Portrait3x4 => "768*1024",
            AspectRatio::Wide16x9 => "1440*810",
            AspectRatio::Tall9x16 => "810*1440",
        }
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AspectRatio::ALL
            .into_iter()
            .find(|r| r.label() == s.trim())
            .ok_or_else(|| {
                let labels: Vec<_> = AspectRatio::ALL.iter().map(|r| r.label()).collect();
                format!("unknown aspect ratio '{}', expected one of {}", s, labels.join(", "))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub file_name: String,
    /// `data:<mime>;base64,<bytes>`
    pub data_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationPlan {
    Chat(ChatRequest),
    GenerateImage(GenerateImageRequest),
    EditImage(ImageEditRequest),
    AnalyzeImage(AnalyzeImageRequest),
}

impl OperationPlan {
    pub fn endpoint(&self) -> &'static str {
        match self {
            OperationPlan::Chat(_) => CHAT_PATH,
            OperationPlan::GenerateImage(_) => GENERATE_IMAGE_PATH,
            OperationPlan::EditImage(_) => IMAGE_EDIT_PATH,
            OperationPlan::AnalyzeImage(_) => ANALYZE_IMAGE_PATH,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OperationPlan::Chat(_) => "chat",
            OperationPlan::GenerateImage(_) => "generate-image",
            OperationPlan::EditImage(_) => "edit-image",
            OperationPlan::AnalyzeImage(_) => "analyze-image",
        }
    }

    /// The prompt an image operation was asked to render, used as alt text.
    pub fn image_prompt(&self) -> Option<&str> {
        match self {
            OperationPlan::GenerateImage(req) => Some(req.prompt.as_str()),
            OperationPlan::EditImage(req) => req.prompt(),
            _ => None,
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles
        .iter()
        .any(|needle| haystack.contains(&needle.to_lowercase()))
}

/// Everything after a leading style prefix, if the text starts with one.
fn strip_style_prefix(text: &str) -> Option<&str> {
    let lowered = text.to_lowercase();
    STYLE_PREFIXES
        .iter()
        .find(|prefix| lowered.starts_with(&prefix.to_lowercase()))
        .map(|prefix| {
            let skip = prefix.chars().count();
            let offset = text
                .char_indices()
                .nth(skip)
                .map(|(i, _)| i)
                .unwrap_or(text.len());
            text[offset..].trim()
        })
}

pub fn classify(
    text: &str,
    attachment: Option<&ImageAttachment>,
    aspect_ratio: Option<AspectRatio>,
) -> OperationPlan {
    let text = text.trim();
    let lowered = text.to_lowercase();
    let size = aspect_ratio.map(|r| r.size().to_string());

    if let Some(image) = attachment {
        if text.is_empty() {
            return OperationPlan::AnalyzeImage(AnalyzeImageRequest {
                image_data_b64: image.data_url.clone(),
                user_question: Some(DESCRIBE_IMAGE_QUESTION.to_string()),
            });
        }
        if contains_any(&lowered, ANALYSIS_KEYWORDS) {
            return OperationPlan::AnalyzeImage(AnalyzeImageRequest {
                image_data_b64: image.data_url.clone(),
                user_question: Some(text.to_string()),
            });
        }

        let (function, prompt) = match strip_style_prefix(text) {
            Some(rest) if !rest.is_empty() => (EditFunction::StylizationAll, rest),
            Some(_) => (EditFunction::StylizationAll, text),
            None if contains_any(&lowered, STYLE_KEYWORDS) => (EditFunction::StylizationAll, text),
            None => (EditFunction::DescriptionEdit, text),
        };
        return OperationPlan::EditImage(ImageEditRequest {
            base_image_data: image.data_url.clone(),
            edit_prompt: Some(prompt.to_string()),
            style_prompt: None,
            edit_function: Some(function.as_str().to_string()),
            n: Some(1),
            size,
        });
    }

    if contains_any(&lowered, GENERATION_KEYWORDS) && !contains_any(&lowered, GENERATION_EXCLUSIONS)
    {
        return OperationPlan::GenerateImage(GenerateImageRequest {
            prompt: text.to_string(),
            size,
            n: Some(1),
            ..Default::default()
        });
    }

    OperationPlan::Chat(ChatRequest {
        message: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageAttachment {
        ImageAttachment {
            file_name: "cat.png".into(),
            data_url: "data:image/png;base64,AAAA".into(),
        }
    }

    fn edit_of(plan: OperationPlan) -> ImageEditRequest {
        match plan {
            OperationPlan::EditImage(req) => req,
            other => panic!("expected EditImage, got {other:?}"),
        }
    }

    #[test]
    fn analysis_keyword_with_image_wins() {
        let plan = classify("请分析这张图", Some(&image()), None);
        match plan {
            OperationPlan::AnalyzeImage(req) => {
                assert_eq!(req.image_data_b64, image().data_url);
                assert_eq!(req.user_question.as_deref(), Some("请分析这张图"));
            }
            other => panic!("expected AnalyzeImage, got {other:?}"),
        }
    }

    #[test]
    fn analysis_beats_style_keywords() {
        let plan = classify("Describe this image style", Some(&image()), None);
        assert_eq!(plan.kind(), "analyze-image");
    }

    #[test]
    fn bare_image_is_analyzed_with_default_question() {
        let plan = classify("   ", Some(&image()), Some(AspectRatio::Square));
        match plan {
            OperationPlan::AnalyzeImage(req) => {
                assert_eq!(req.user_question.as_deref(), Some(DESCRIBE_IMAGE_QUESTION));
            }
            other => panic!("expected AnalyzeImage, got {other:?}"),
        }
    }

    #[test]
    fn style_prefix_is_stripped() {
        let req = edit_of(classify("风格化：水彩画", Some(&image()), None));
        assert_eq!(req.edit_function.as_deref(), Some("stylization_all"));
        assert_eq!(req.edit_prompt.as_deref(), Some("水彩画"));
        assert_eq!(req.n, Some(1));
        assert_eq!(req.size, None);
    }

    #[test]
    fn style_prefix_is_case_insensitive() {
        let req = edit_of(classify("Style:  Van Gogh", Some(&image()), None));
        assert_eq!(req.edit_function.as_deref(), Some("stylization_all"));
        assert_eq!(req.edit_prompt.as_deref(), Some("Van Gogh"));
    }

    #[test]
    fn prefix_alone_keeps_whole_text_as_prompt() {
        let req = edit_of(classify("style:", Some(&image()), None));
        assert_eq!(req.edit_prompt.as_deref(), Some("style:"));
    }

    #[test]
    fn style_keyword_selects_stylization_without_stripping() {
        let req = edit_of(classify("换成赛博朋克风格", Some(&image()), Some(AspectRatio::Wide16x9)));
        assert_eq!(req.edit_function.as_deref(), Some("stylization_all"));
        assert_eq!(req.edit_prompt.as_deref(), Some("换成赛博朋克风格"));
        assert_eq!(req.size.as_deref(), Some("1440*810"));
    }

    #[test]
    fn other_text_with_image_is_description_edit() {
        let req = edit_of(classify("add a hat", Some(&image()), None));
        assert_eq!(req.edit_function.as_deref(), Some("description_edit"));
        assert_eq!(req.base_image_data, image().data_url);
    }

    #[test]
    fn generation_keyword_without_image_generates() {
        let plan = classify("画一只猫", None, None);
        match plan {
            OperationPlan::GenerateImage(req) => {
                assert_eq!(req.prompt, "画一只猫");
                assert_eq!(req.n, Some(1));
                assert_eq!(req.size, None);
            }
            other => panic!("expected GenerateImage, got {other:?}"),
        }
    }

    #[test]
    fn generation_carries_selected_size() {
        for ratio in AspectRatio::ALL {
            match classify("生成一座山", None, Some(ratio)) {
                OperationPlan::GenerateImage(req) => {
                    assert_eq!(req.size.as_deref(), Some(ratio.size()))
                }
                other => panic!("expected GenerateImage, got {other:?}"),
            }
        }
    }

    #[test]
    fn exclusion_keywords_fall_back_to_chat() {
        for text in ["画的提示词是什么", "帮我修改这幅画", "生成 style: 赛博"] {
            assert_eq!(classify(text, None, None).kind(), "chat", "{text}");
        }
    }

    #[test]
    fn plain_text_is_chat() {
        let plan = classify("  hello there ", None, Some(AspectRatio::Square));
        assert_eq!(
            plan,
            OperationPlan::Chat(ChatRequest {
                message: "hello there".into()
            })
        );
        assert_eq!(plan.endpoint(), "/api/chat");
    }

    #[test]
    fn aspect_ratio_parses_labels() {
        assert_eq!("9:16".parse::<AspectRatio>().unwrap().size(), "810*1440");
        assert_eq!("4:3".parse::<AspectRatio>().unwrap().size(), "1024*768");
        assert_eq!("3:4".parse::<AspectRatio>().unwrap().size(), "768*1024");
        assert!("2:1".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn image_prompt_is_exposed_for_alt_text() {
        assert_eq!(classify("画一只猫", None, None).image_prompt(), Some("画一只猫"));
        assert_eq!(classify("hi", None, None).image_prompt(), None);
    }
}
