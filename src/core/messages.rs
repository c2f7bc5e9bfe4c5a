use crate::core::error::ValidationError;

/// Narration language for user-facing text and voiceover scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Arabic,
    English,
}

impl Language {
    pub fn from_code(code: &str) -> Self {
        if code.trim().to_lowercase().starts_with("ar") {
            Language::Arabic
        } else {
            Language::English
        }
    }

    /// Name used inside model instructions.
    pub fn english_name(self) -> &'static str {
        match self {
            Language::Arabic => "Arabic",
            Language::English => "English",
        }
    }
}

/// User-visible strings.
#[derive(Debug, Clone, Copy)]
pub struct Messages {
    language: Language,
}

impl Messages {
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    pub fn progress_title(&self, story_name: &str) -> String {
        match self.language {
            Language::Arabic => format!("جاري إنشاء قصة \"{}\"", story_name),
            Language::English => format!("Creating story \"{}\"", story_name),
        }
    }

    pub fn split_step(&self, num_scenes: usize) -> String {
        match self.language {
            Language::Arabic => format!("تحليل القصة وتقسيمها إلى {} مشاهد", num_scenes),
            Language::English => format!("Analyzing the story into {} scenes", num_scenes),
        }
    }

    pub fn image_step(&self, scene_number: usize) -> String {
        match self.language {
            Language::Arabic => format!("إنشاء صورة للمشهد {}", scene_number),
            Language::English => format!("Generating image for scene {}", scene_number),
        }
    }

    pub fn scene_heading(&self, scene_number: usize) -> String {
        match self.language {
            Language::Arabic => format!("المشهد {}:", scene_number),
            Language::English => format!("Scene {}:", scene_number),
        }
    }

    pub fn no_credential(&self) -> String {
        match self.language {
            Language::Arabic => "لا يوجد مفتاح API. الرجاء إضافة واحد في الإعدادات.".to_string(),
            Language::English => "No API key. Please add one in the settings.".to_string(),
        }
    }

    pub fn credentials_exhausted(&self) -> String {
        match self.language {
            Language::Arabic => "فشلت جميع مفاتيح API المتاحة أو استنفدت حصتها. الرجاء التحقق من مفاتيحك في الإعدادات.".to_string(),
            Language::English => "All available API keys failed or ran out of quota. Please check your keys in the settings.".to_string(),
        }
    }

    pub fn unexpected_format(&self) -> String {
        match self.language {
            Language::Arabic => "تعذرت معالجة الطلب. أعاد الذكاء الاصطناعي تنسيقًا غير متوقع.".to_string(),
            Language::English => "The request could not be processed. The AI returned an unexpected format.".to_string(),
        }
    }

    pub fn invalid_image(&self) -> String {
        match self.language {
            Language::Arabic => "تنسيق الصورة غير صالح.".to_string(),
            Language::English => "Invalid image format.".to_string(),
        }
    }

    pub fn edit_refused(&self, reason: &str) -> String {
        match self.language {
            Language::Arabic => format!("فشل تعديل الصورة: {}", reason),
            Language::English => format!("Image editing failed: {}", reason),
        }
    }

    pub fn invalid_backup(&self) -> String {
        match self.language {
            Language::Arabic => "ملف النسخة الاحتياطية غير صالح أو تالف.".to_string(),
            Language::English => "The backup file is invalid or corrupted.".to_string(),
        }
    }

    pub fn unknown_error(&self) -> String {
        match self.language {
            Language::Arabic => "حدث خطأ غير معروف.".to_string(),
            Language::English => "An unknown error occurred.".to_string(),
        }
    }

    pub fn validation(&self, error: &ValidationError) -> String {
        match (self.language, error) {
            (Language::Arabic, ValidationError::NoCredential) => {
                "الرجاء إضافة مفتاح API في الإعدادات أولاً.".to_string()
            }
            (Language::English, ValidationError::NoCredential) => {
                "Please add an API key in the settings first.".to_string()
            }
            (Language::Arabic, ValidationError::TooManyScenes { requested, .. }) => format!(
                "عدد المشاهد المحسوب ({}) كبير جدًا. يرجى اختيار مدة فيديو أقصر أو مدة مشهد أطول.",
                requested
            ),
            (Language::English, ValidationError::TooManyScenes { requested, max }) => format!(
                "The computed number of scenes ({}) exceeds {}. Choose a shorter video or longer scenes.",
                requested, max
            ),
            (Language::Arabic, ValidationError::InvalidSceneDuration) => {
                "مدة المشهد يجب أن تكون أكبر من صفر.".to_string()
            }
            (Language::English, ValidationError::InvalidSceneDuration) => {
                "Scene duration must be greater than zero.".to_string()
            }
            (Language::Arabic, ValidationError::MissingDescription) => {
                "الرجاء إدخال وصف للشخصية.".to_string()
            }
            (Language::English, ValidationError::MissingDescription) => {
                "Please enter a character description.".to_string()
            }
            (Language::Arabic, _) => {
                "يرجى تقديم اسم للقصة، ونص، واختيار شخصية واحدة على الأقل.".to_string()
            }
            (Language::English, _) => {
                "Please provide a story name, a prompt, and select at least one character.".to_string()
            }
        }
    }
}
