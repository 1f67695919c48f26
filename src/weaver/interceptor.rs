//! Interceptor descriptors and weaving candidates.
//!
//! Discovering which methods carry interceptor attributes is up to the caller: a
//! [`Candidate`] names a method and lists the attribute occurrences to weave, each as an
//! [`InterceptorDescriptor`] with its target, its hook capabilities and its declaration
//! order. [`Candidate::discover`] covers the common case of classifying attributes by type.

use bitflags::bitflags;

use crate::{
    metadata::{CustomAttribute, MethodDef, Token},
    Error, Result,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// The hooks an interceptor implements.
    pub struct Capabilities: u8 {
        /// Called before the body runs.
        const ENTER = 0x01;
        /// Called after the body ran, on every path.
        const EXIT = 0x02;
        /// Called when the body raised an exception.
        const EXCEPTION = 0x04;
    }
}

/// What an interceptor is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterceptorTarget {
    /// The method as a whole.
    Method,
    /// One formal parameter, by 0-based index.
    Parameter(u16),
    /// Every formal parameter, in order.
    AllParameters,
}

/// One interceptor attribute occurrence to weave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorDescriptor {
    /// Token of the attribute occurrence on the method or one of its parameters.
    pub attribute: Token,
    /// What the interceptor is attached to.
    pub target: InterceptorTarget,
    /// Hooks to call; parameter interceptors only ever receive [`Capabilities::ENTER`].
    pub capabilities: Capabilities,
    /// Declaration order; hooks are called in ascending order.
    pub order: u32,
}

impl InterceptorDescriptor {
    /// Returns `true` for interceptors of the method as a whole.
    #[must_use]
    pub fn is_method_scoped(&self) -> bool {
        self.target == InterceptorTarget::Method
    }

    /// The formal parameters this interceptor is called for.
    #[must_use]
    pub fn parameters(&self, param_count: u16) -> Vec<u16> {
        match self.target {
            InterceptorTarget::Method => Vec::new(),
            InterceptorTarget::Parameter(index) => vec![index],
            InterceptorTarget::AllParameters => (0..param_count).collect(),
        }
    }
}

/// How [`Candidate::discover`] should treat an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorRole {
    /// A method interceptor implementing the given hooks.
    Method(Capabilities),
    /// A parameter interceptor; on the method itself it applies to every parameter.
    Parameter,
}

/// A method to weave and the interceptors attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// `MethodDef` token of the method.
    pub method: Token,
    /// Attached interceptors.
    pub interceptors: Vec<InterceptorDescriptor>,
}

impl Candidate {
    /// Starts building a candidate for `method`.
    #[must_use]
    pub fn builder(method: Token) -> CandidateBuilder {
        CandidateBuilder {
            method,
            interceptors: Vec::new(),
            next_order: 0,
        }
    }

    /// Builds a candidate from the attributes of `method`, classified by `classify`.
    ///
    /// Method attributes come first, then the attributes of each parameter in parameter
    /// order; declaration order follows the same sequence. Returns `None` if no attribute
    /// is classified as an interceptor.
    pub fn discover<F>(method: &MethodDef, classify: F) -> Option<Candidate>
    where
        F: Fn(&CustomAttribute) -> Option<InterceptorRole>,
    {
        let mut builder = Candidate::builder(method.token);

        for attribute in &method.custom_attributes {
            builder = match classify(attribute) {
                Some(InterceptorRole::Method(capabilities)) => {
                    builder.method_interceptor(attribute.token, capabilities)
                }
                Some(InterceptorRole::Parameter) => builder.all_parameters(attribute.token),
                None => builder,
            };
        }

        for param in &method.params {
            for attribute in &param.custom_attributes {
                builder = match classify(attribute) {
                    Some(InterceptorRole::Parameter) => {
                        builder.parameter_interceptor(attribute.token, param.index)
                    }
                    Some(InterceptorRole::Method(_)) => {
                        log::warn!(
                            "Ignoring method interceptor {} on parameter '{}' of {}",
                            attribute.attribute_type(),
                            param.name,
                            method.full_name()
                        );
                        builder
                    }
                    None => builder,
                };
            }
        }

        let candidate = builder.build();
        (!candidate.interceptors.is_empty()).then_some(candidate)
    }

    /// Method interceptors, in declaration order.
    #[must_use]
    pub fn method_interceptors(&self) -> Vec<&InterceptorDescriptor> {
        self.sorted(true)
    }

    /// Parameter interceptors, in declaration order.
    #[must_use]
    pub fn parameter_interceptors(&self) -> Vec<&InterceptorDescriptor> {
        self.sorted(false)
    }

    fn sorted(&self, method_scoped: bool) -> Vec<&InterceptorDescriptor> {
        let mut interceptors: Vec<&InterceptorDescriptor> = self
            .interceptors
            .iter()
            .filter(|d| d.is_method_scoped() == method_scoped)
            .collect();
        interceptors.sort_by_key(|d| d.order);
        interceptors
    }

    /// Checks the candidate against the method it names.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedTarget`] if the candidate has no interceptors, names an
    /// attribute the method does not carry or a parameter it does not have
    pub fn validate(&self, method: &MethodDef) -> Result<()> {
        let unsupported = |reason: String| Error::UnsupportedTarget {
            method: method.full_name(),
            reason,
        };

        if self.interceptors.is_empty() {
            return Err(unsupported("no interceptors are attached".to_string()));
        }

        for descriptor in &self.interceptors {
            if method.find_attribute(descriptor.attribute).is_none() {
                return Err(unsupported(format!(
                    "attribute {} is not attached to the method",
                    descriptor.attribute
                )));
            }
            if let InterceptorTarget::Parameter(index) = descriptor.target {
                if usize::from(index) >= method.params.len() {
                    return Err(unsupported(format!(
                        "parameter index {} is out of range",
                        index
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Builder for [`Candidate`]s; declaration order follows the order of the calls.
#[derive(Debug, Clone)]
pub struct CandidateBuilder {
    method: Token,
    interceptors: Vec<InterceptorDescriptor>,
    next_order: u32,
}

impl CandidateBuilder {
    fn push(mut self, attribute: Token, target: InterceptorTarget, capabilities: Capabilities) -> Self {
        self.interceptors.push(InterceptorDescriptor {
            attribute,
            target,
            capabilities,
            order: self.next_order,
        });
        self.next_order += 1;
        self
    }

    /// Adds a method interceptor.
    #[must_use]
    pub fn method_interceptor(self, attribute: Token, capabilities: Capabilities) -> Self {
        self.push(attribute, InterceptorTarget::Method, capabilities)
    }

    /// Adds a parameter interceptor for formal parameter `index`.
    #[must_use]
    pub fn parameter_interceptor(self, attribute: Token, index: u16) -> Self {
        self.push(attribute, InterceptorTarget::Parameter(index), Capabilities::ENTER)
    }

    /// Adds a parameter interceptor applied to every formal parameter.
    #[must_use]
    pub fn all_parameters(self, attribute: Token) -> Self {
        self.push(attribute, InterceptorTarget::AllParameters, Capabilities::ENTER)
    }

    /// Finishes the candidate.
    #[must_use]
    pub fn build(self) -> Candidate {
        Candidate {
            method: self.method,
            interceptors: self.interceptors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::ModuleDef,
        test::{calculator_compute, DOUBLE_ATTRIBUTE, TRACE_ATTRIBUTE},
    };

    fn classify(attribute: &CustomAttribute) -> Option<InterceptorRole> {
        match attribute.attribute_type() {
            TRACE_ATTRIBUTE => Some(InterceptorRole::Method(Capabilities::all())),
            DOUBLE_ATTRIBUTE => Some(InterceptorRole::Parameter),
            _ => None,
        }
    }

    #[test]
    fn test_discover_orders_method_then_parameters() {
        let mut module = ModuleDef::new("Demo.dll");
        let token = module.add_method(calculator_compute());
        let method = &module.methods[0];

        let candidate = Candidate::discover(method, classify);
        let candidate = candidate.expect("compute carries interceptors");
        assert_eq!(candidate.method, token);
        assert_eq!(candidate.interceptors.len(), 2);
        assert_eq!(candidate.interceptors[0].target, InterceptorTarget::Method);
        assert_eq!(
            candidate.interceptors[1].target,
            InterceptorTarget::Parameter(0)
        );
        assert_eq!(candidate.interceptors[1].capabilities, Capabilities::ENTER);
        assert!(candidate.validate(method).is_ok());
    }

    #[test]
    fn test_discover_without_interceptors() {
        let mut module = ModuleDef::new("Demo.dll");
        module.add_method(calculator_compute());
        assert!(Candidate::discover(&module.methods[0], |_| None).is_none());
    }

    #[test]
    fn test_parameter_role_on_method_targets_all_parameters() {
        let mut module = ModuleDef::new("Demo.dll");
        module.add_method(calculator_compute());
        let method = &module.methods[0];

        let candidate = Candidate::discover(method, |_| Some(InterceptorRole::Parameter));
        let candidate = candidate.expect("every attribute is a parameter interceptor");
        assert_eq!(candidate.interceptors[0].target, InterceptorTarget::AllParameters);
        assert_eq!(candidate.interceptors[0].parameters(2), vec![0, 1]);
        assert!(candidate.method_interceptors().is_empty());
        assert_eq!(candidate.parameter_interceptors().len(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_descriptors() {
        let mut module = ModuleDef::new("Demo.dll");
        let token = module.add_method(calculator_compute());
        let method = &module.methods[0];
        let attribute = method.custom_attributes[0].token;

        let empty = Candidate::builder(token).build();
        assert!(matches!(
            empty.validate(method),
            Err(Error::UnsupportedTarget { .. })
        ));

        let out_of_range = Candidate::builder(token)
            .parameter_interceptor(attribute, 5)
            .build();
        assert!(out_of_range.validate(method).is_err());

        let missing = Candidate::builder(token)
            .method_interceptor(Token::new(0x0C00_00FF), Capabilities::ENTER)
            .build();
        assert!(missing.validate(method).is_err());
    }

    #[test]
    fn test_sorted_by_order() {
        let mut candidate = Candidate::builder(Token::new(0x0600_0001))
            .method_interceptor(Token::new(0x0C00_0001), Capabilities::ENTER)
            .method_interceptor(Token::new(0x0C00_0002), Capabilities::EXIT)
            .build();
        candidate.interceptors.reverse();

        let orders: Vec<u32> = candidate.method_interceptors().iter().map(|d| d.order).collect();
        assert_eq!(orders, vec![0, 1]);
    }
}
